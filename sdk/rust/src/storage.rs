//! Local persistence of the current license record.
//!
//! [`EncryptedFileStore`] keeps one file per installation, encrypted with a
//! key that only this machine can derive. File format:
//! MAGIC (4 bytes) || nonce (12 bytes) || ciphertext

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::error::{Result, SdkError};
use crate::types::LicenseRecord;

/// Nonce size for AES-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Magic bytes to identify the license file
const STORE_MAGIC: &[u8] = b"LGS1";

const KDF_SALT: &[u8] = b"licensegate-store-v1";
const KDF_INFO: &[u8] = b"license.dat";

/// File name inside the application data directory.
pub const LICENSE_FILE_NAME: &str = "license.dat";

/// Storage adapter trait for custom storage implementations
///
/// `load` never fails: a missing, corrupt or foreign record is `None`, which
/// the manager reports as `NotFound`.
pub trait LicenseStore: Send + Sync {
    fn load(&self) -> Option<LicenseRecord>;

    fn save(&self, record: &LicenseRecord) -> Result<()>;

    /// Remove the record. Clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;
}

/// In-memory store
///
/// Useful for testing or ephemeral storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: RwLock<Option<LicenseRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: LicenseRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

impl LicenseStore for MemoryStore {
    fn load(&self) -> Option<LicenseRecord> {
        self.record.read().ok()?.clone()
    }

    fn save(&self, record: &LicenseRecord) -> Result<()> {
        let mut slot = self
            .record
            .write()
            .map_err(|_| SdkError::storage("Memory store lock poisoned"))?;
        *slot = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self
            .record
            .write()
            .map_err(|_| SdkError::storage("Memory store lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// Machine-bound, authenticated license file.
///
/// The AES-256-GCM key is derived with HKDF-SHA256 from a binding secret
/// (normally [`crate::probe::machine_binding_id`]), so a file copied to
/// another machine fails authentication and loads as `None`.
pub struct EncryptedFileStore {
    path: PathBuf,
    key: [u8; 32],
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, binding_secret: &str) -> Self {
        Self {
            path: path.into(),
            key: derive_key(binding_secret),
        }
    }

    /// Store at the default per-OS location, bound to this machine.
    ///
    /// Data is stored in:
    /// - Linux: `~/.local/share/{app_name}/license.dat`
    /// - macOS: `~/Library/Application Support/{app_name}/license.dat`
    /// - Windows: `C:\Users\{User}\AppData\Roaming\{app_name}\license.dat`
    #[cfg(feature = "native-storage")]
    pub fn for_app(app_name: &str) -> Option<Self> {
        let dirs = directories::ProjectDirs::from("", "", app_name)?;
        let path = dirs.data_dir().join(LICENSE_FILE_NAME);

        let binding = crate::probe::machine_binding_id().unwrap_or_else(|| {
            tracing::warn!("No OS machine id available; binding license file to hardware fingerprint");
            crate::fingerprint::Fingerprinter::new(std::sync::Arc::new(
                crate::probe::SystemProbe::new(),
            ))
            .identity()
            .hashed_id
        });

        Some(Self::new(path, &binding))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| SdkError::storage(format!("Failed to create cipher: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SdkError::storage(format!("Encryption failed: {}", e)))?;

        let mut result = Vec::with_capacity(STORE_MAGIC.len() + NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(STORE_MAGIC);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, blob: &[u8]) -> Option<Vec<u8>> {
        if blob.len() < STORE_MAGIC.len() + NONCE_SIZE + 1 {
            return None;
        }
        if &blob[..STORE_MAGIC.len()] != STORE_MAGIC {
            return None;
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key).ok()?;
        let nonce_start = STORE_MAGIC.len();
        let nonce_end = nonce_start + NONCE_SIZE;
        let nonce = Nonce::from_slice(&blob[nonce_start..nonce_end]);
        cipher.decrypt(nonce, &blob[nonce_end..]).ok()
    }
}

impl LicenseStore for EncryptedFileStore {
    fn load(&self) -> Option<LicenseRecord> {
        let blob = fs::read(&self.path).ok()?;
        let Some(plaintext) = self.decrypt(&blob) else {
            tracing::warn!(path = %self.path.display(), "License file failed authentication");
            return None;
        };
        match serde_json::from_slice(&plaintext) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "License file holds an unreadable record");
                None
            }
        }
    }

    fn save(&self, record: &LicenseRecord) -> Result<()> {
        let plaintext = serde_json::to_vec(record)
            .map_err(|e| SdkError::storage(format!("Failed to serialize license: {}", e)))?;
        let blob = self.encrypt(&plaintext)?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| SdkError::storage(format!("Failed to create {}: {}", dir.display(), e)))?;
        }

        // Write to a sibling temp file and rename over the target so a crash
        // never leaves a truncated license file
        let tmp = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&blob)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SdkError::storage(format!("Failed to write license file: {}", e))
        })
    }

    fn clear(&self) -> Result<()> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() as usize,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SdkError::storage(format!("Failed to stat license file: {}", e))),
        };

        let overwrite = || -> std::io::Result<()> {
            let mut file = OpenOptions::new().write(true).open(&self.path)?;
            file.write_all(&vec![0u8; len])?;
            file.sync_all()
        };
        if let Err(e) = overwrite() {
            tracing::warn!(error = %e, "Could not overwrite license file before removal");
        }

        fs::remove_file(&self.path)
            .map_err(|e| SdkError::storage(format!("Failed to remove license file: {}", e)))
    }
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish()
    }
}

fn derive_key(binding_secret: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), binding_secret.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(KDF_INFO, &mut key)
        .expect("HKDF expand should not fail with valid length");
    key
}
