#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

pub use licensegate_sdk::*;

pub const TEST_KEY: &str = "ABCDE-FGHJK-LMNPQ-RSTUV-WXYZ2";

/// How the fake server answers validate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Online,
    Offline,
    Rejects(LicenseStatus),
    /// Validate calls never answer.
    Stalled,
}

/// In-process stand-in for the license server.
pub struct FakeApi {
    pub signing_key: SigningKey,
    pub mode: Mutex<ServerMode>,
    pub activate_calls: AtomicUsize,
    pub validate_calls: AtomicUsize,
    pub deactivate_calls: AtomicUsize,
    pub offline_grace_days: u32,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            mode: Mutex::new(ServerMode::Online),
            activate_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
            deactivate_calls: AtomicUsize::new(0),
            offline_grace_days: 7,
        }
    }

    pub fn set_mode(&self, mode: ServerMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn public_key(&self) -> String {
        codec::encode_public_key(&self.signing_key.verifying_key())
    }

    /// A signed record bound to `activation`.
    pub fn issue(&self, key: &str, activation: Option<HardwareActivation>) -> LicenseRecord {
        let now = Utc::now();
        let mut record = LicenseRecord {
            license_id: "7d1c3a52-0000-4000-8000-000000000001".into(),
            license_key: key.into(),
            license_type: LicenseType::Professional,
            licensee_name: "Ada Lovelace".into(),
            licensee_email: "ada@example.com".into(),
            company: None,
            issued_at_utc: now,
            expires_at_utc: now + Duration::days(365),
            support_expiry_utc: now + Duration::days(365),
            max_machines: 2,
            offline_grace_days: self.offline_grace_days,
            schema_version: SCHEMA_VERSION,
            activations: activation.into_iter().collect(),
            signature: vec![],
            last_validation_utc: now,
        };
        record.signature = codec::sign(&record, &self.signing_key);
        record
    }

    pub fn resign(&self, record: &mut LicenseRecord) {
        record.signature = codec::sign(record, &self.signing_key);
    }
}

impl LicenseApi for FakeApi {
    async fn activate(&self, request: &ActivateRequest) -> Result<LicenseRecord> {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        Ok(self.issue(
            &request.license_key,
            Some(HardwareActivation {
                hardware_id: request.hardware_id.clone(),
                short_id: request.hardware_id_short.clone(),
                machine_name: request.machine_name.clone(),
                activated_at_utc: now,
                last_seen_utc: now,
                components_hash: request.components_hash.clone(),
            }),
        ))
    }

    async fn deactivate(&self, _request: &DeactivateRequest) -> Result<()> {
        self.deactivate_calls.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock().unwrap() {
            ServerMode::Offline => Err(SdkError::network("connection refused")),
            _ => Ok(()),
        }
    }

    async fn validate(&self, _request: &ValidateRequest) -> Result<ValidateResponse> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            ServerMode::Online => Ok(ValidateResponse {
                valid: true,
                status: LicenseStatus::Valid,
                message: None,
                license: None,
            }),
            ServerMode::Offline => Err(SdkError::network("connection refused")),
            ServerMode::Stalled => std::future::pending().await,
            ServerMode::Rejects(status) => Ok(ValidateResponse {
                valid: false,
                status,
                message: Some(format!("License is {}", status)),
                license: None,
            }),
        }
    }
}

pub fn full_probe() -> Arc<StaticProbe> {
    Arc::new(StaticProbe::new(
        [
            (HardwareComponent::Cpu, "BFEBFBFF000906EA"),
            (HardwareComponent::Bios, "PF2ABCDE"),
            (HardwareComponent::Disk, "S4EWNX0N123456"),
            (HardwareComponent::Mac, "3c:52:82:11:22:33"),
            (HardwareComponent::Motherboard, "L1HF05P00AB"),
            (HardwareComponent::Tpm, "INTC-2.0"),
        ]
        .into_iter()
        .map(|(c, v)| (c, v.to_string())),
    ))
}

pub struct Harness {
    pub manager: Arc<LicenseManager<Arc<FakeApi>>>,
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryStore>,
    pub probe: Arc<StaticProbe>,
}

/// Store whose `clear` always fails, like a license file on a read-only volume.
#[derive(Debug, Default)]
pub struct ClearFailsStore {
    inner: MemoryStore,
}

impl LicenseStore for ClearFailsStore {
    fn load(&self) -> Option<LicenseRecord> {
        self.inner.load()
    }

    fn save(&self, record: &LicenseRecord) -> Result<()> {
        self.inner.save(record)
    }

    fn clear(&self) -> Result<()> {
        Err(SdkError::storage("Permission denied"))
    }
}

fn test_options(api: &FakeApi) -> ManagerOptions {
    ManagerOptions {
        public_key: api.public_key(),
        app_version: "1.2.3".into(),
        machine_name: Some("test-rig".into()),
        ..Default::default()
    }
}

pub fn manager_with_store(
    api: &Arc<FakeApi>,
    store: Arc<dyn LicenseStore>,
) -> LicenseManager<Arc<FakeApi>> {
    LicenseManager::with_api(test_options(api), store, full_probe(), api.clone())
        .expect("manager builds")
}

pub fn harness() -> Harness {
    let api = Arc::new(FakeApi::new());
    harness_with(api)
}

pub fn harness_with(api: Arc<FakeApi>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let probe = full_probe();
    let manager = LicenseManager::with_api(test_options(&api), store.clone(), probe.clone(), api.clone())
        .expect("manager builds");
    Harness {
        manager: Arc::new(manager),
        api,
        store,
        probe,
    }
}

/// Move the stored record's last online validation into the past.
pub fn age_last_validation(store: &MemoryStore, days: i64) {
    let mut record = store.load().expect("record installed");
    record.last_validation_utc = Utc::now() - Duration::days(days) - Duration::minutes(1);
    store.save(&record).unwrap();
}
