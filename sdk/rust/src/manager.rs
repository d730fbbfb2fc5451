//! Client-side license lifecycle.
//!
//! [`LicenseManager`] owns the current license and its status. Every
//! operation returns a [`LicenseValidationResult`]; nothing here returns an
//! error past the call boundary.
//!
//! Passes are serialized by an async mutex. Their outcome is published as a
//! [`LicenseSnapshot`] on a [`tokio::sync::watch`] channel, so reads never
//! wait behind a pass that is retrying over the network. A tamper report is
//! sticky: once raised, every read and every later pass reports
//! [`LicenseStatus::Tampered`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::codec;
use crate::error::Result;
use crate::fingerprint::{Fingerprinter, HardwareComponentSet, HardwareIdentity};
use crate::key::KeyFormat;
use crate::probe::{self, HardwareProbe};
use crate::storage::LicenseStore;
use crate::transport::{HttpTransport, LicenseApi};
use crate::types::{
    ActivateRequest, DeactivateRequest, LicenseInfo, LicenseRecord, LicenseStatus,
    LicenseValidationResult, ValidateRequest,
};

/// Configuration for [`LicenseManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// License server root, e.g. `https://licenses.example.com`.
    pub base_url: String,
    /// Base64 Ed25519 public key the server signs with.
    pub public_key: String,
    pub app_version: String,
    /// How long a local pass may go without asking the server.
    pub online_validation_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Reported with activations; defaults to the host name.
    pub machine_name: Option<String>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            public_key: String::new(),
            app_version: String::new(),
            online_validation_interval: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            machine_name: None,
        }
    }
}

/// Last published outcome of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseSnapshot {
    pub status: LicenseStatus,
    pub license: Option<LicenseRecord>,
    pub grace_days_remaining: Option<i64>,
    pub hardware_id_short: Option<String>,
}

/// Held for the duration of a pass.
#[derive(Debug, Default)]
struct PassState {
    /// Skip the online interval on the next pass.
    force_online: bool,
}

pub struct LicenseManager<A: LicenseApi = HttpTransport> {
    api: A,
    store: Arc<dyn LicenseStore>,
    fingerprinter: Fingerprinter,
    public_key: VerifyingKey,
    options: ManagerOptions,
    machine_name: String,
    pass: Mutex<PassState>,
    tampered: AtomicBool,
    snapshot_tx: watch::Sender<LicenseSnapshot>,
}

impl LicenseManager<HttpTransport> {
    /// Manager talking to `options.base_url` over HTTP.
    pub fn new(
        options: ManagerOptions,
        store: Arc<dyn LicenseStore>,
        probe: Arc<dyn HardwareProbe>,
    ) -> Result<Self> {
        let api = HttpTransport::new(
            &options.base_url,
            options.request_timeout,
            options.max_retries,
            options.retry_base_delay,
            &options.app_version,
        )?;
        Self::with_api(options, store, probe, api)
    }

    /// HTTP manager using the encrypted per-OS license file and the system
    /// hardware probe.
    #[cfg(feature = "native-storage")]
    pub fn for_app(app_name: &str, options: ManagerOptions) -> Result<Self> {
        let store = crate::storage::EncryptedFileStore::for_app(app_name).ok_or_else(|| {
            crate::error::SdkError::storage("No application data directory available")
        })?;
        Self::new(options, Arc::new(store), Arc::new(probe::SystemProbe::new()))
    }
}

impl<A: LicenseApi> LicenseManager<A> {
    pub fn with_api(
        options: ManagerOptions,
        store: Arc<dyn LicenseStore>,
        probe: Arc<dyn HardwareProbe>,
        api: A,
    ) -> Result<Self> {
        let public_key = codec::parse_public_key(&options.public_key)?;
        let machine_name = options.machine_name.clone().unwrap_or_else(default_machine_name);
        let (snapshot_tx, _) = watch::channel(LicenseSnapshot::default());

        Ok(Self {
            api,
            store,
            fingerprinter: Fingerprinter::new(probe),
            public_key,
            options,
            machine_name,
            pass: Mutex::new(PassState::default()),
            tampered: AtomicBool::new(false),
            snapshot_tx,
        })
    }

    // ==================== Consumers ====================

    /// Current status without running a validation pass.
    pub fn status(&self) -> LicenseStatus {
        if self.is_tampered() {
            return LicenseStatus::Tampered;
        }
        self.snapshot_tx.borrow().status
    }

    /// Receives a snapshot on every status transition.
    pub fn subscribe(&self) -> watch::Receiver<LicenseSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Valid or in the offline grace period, and never after a tamper report.
    pub fn is_license_valid(&self) -> bool {
        !self.is_tampered() && self.status().allows_use()
    }

    pub fn is_support_active(&self) -> bool {
        self.snapshot_tx
            .borrow()
            .license
            .as_ref()
            .is_some_and(|l| l.is_support_active(Utc::now()))
    }

    pub fn license_info(&self) -> LicenseInfo {
        let snapshot = self.snapshot_tx.borrow();
        let now = Utc::now();
        let license = snapshot.license.as_ref();
        LicenseInfo {
            status: if self.is_tampered() {
                LicenseStatus::Tampered
            } else {
                snapshot.status
            },
            license_type: license.map(|l| l.license_type),
            licensee_name: license.map(|l| l.licensee_name.clone()),
            expires_at: license.map(|l| l.expires_at_utc),
            days_remaining: license.and_then(|l| l.days_remaining(now)),
            support_days_remaining: license.map(|l| l.support_days_remaining(now)),
            hardware_id_short: snapshot.hardware_id_short.clone(),
        }
    }

    /// Days left in the offline grace period, when in it.
    pub fn grace_days_remaining(&self) -> Option<i64> {
        self.snapshot_tx.borrow().grace_days_remaining
    }

    /// Force [`LicenseStatus::Tampered`]. Cannot be undone for the lifetime
    /// of this manager.
    pub fn report_tamper(&self) {
        if !self.tampered.swap(true, Ordering::SeqCst) {
            tracing::error!("Tamper reported; license locked");
        }
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.status = LicenseStatus::Tampered);
    }

    pub fn is_tampered(&self) -> bool {
        self.tampered.load(Ordering::SeqCst)
    }

    // ==================== Lifecycle ====================

    /// Re-derive the status from the stored record, the current hardware
    /// and, once the online interval has passed, the server.
    pub async fn validate_current(&self) -> LicenseValidationResult {
        if self.is_tampered() {
            return tampered_result();
        }

        let mut pass = self.pass.lock().await;
        let result = self.validate_locked(&mut pass).await;
        self.apply(result)
    }

    async fn validate_locked(&self, pass: &mut PassState) -> LicenseValidationResult {
        let Some(record) = self.store.load() else {
            return LicenseValidationResult::failure(
                LicenseStatus::NotFound,
                "No license is installed",
            );
        };

        let now = Utc::now();
        if record.is_expired(now) {
            return LicenseValidationResult::failure(
                LicenseStatus::Expired,
                format!("License expired on {}", record.expires_at_utc.format("%Y-%m-%d")),
            )
            .with_license(record);
        }

        if !record.is_trial() && !codec::verify(&record, &self.public_key) {
            tracing::warn!(license_id = %record.license_id, "Stored license failed signature check");
            return LicenseValidationResult::failure(
                LicenseStatus::InvalidSignature,
                "License signature is invalid",
            );
        }

        let identity = self.current_identity().await;
        self.publish_hardware_id(&identity);
        if record
            .find_activation(&identity.hashed_id, Some(&identity.raw_components))
            .is_none()
        {
            return LicenseValidationResult::failure(
                LicenseStatus::HardwareMismatch,
                "License is not activated on this machine",
            )
            .with_license(record);
        }

        if record.is_trial() {
            let mut result = LicenseValidationResult::success(record);
            result.message = "Trial license is active".to_string();
            return result;
        }

        let elapsed = now - record.last_validation_utc;
        let interval = chrono::Duration::from_std(self.options.online_validation_interval)
            .unwrap_or(chrono::Duration::MAX);
        // A clock that moved backwards leaves elapsed negative; that is due too
        let due = pass.force_online || elapsed < chrono::Duration::zero() || elapsed >= interval;
        if !due {
            return LicenseValidationResult::success(record);
        }

        let request = ValidateRequest {
            license_id: record.license_id.clone(),
            license_key: record.license_key.clone(),
            hardware_id: identity.hashed_id.clone(),
            app_version: self.options.app_version.clone(),
            components_hash: Some(identity.raw_components.clone()),
        };

        match self.api.validate(&request).await {
            Ok(response) if response.valid => {
                // Renewals arrive as a newly signed record; anything that
                // does not verify is ignored in favour of the local copy
                let mut current = response
                    .license
                    .filter(|l| l.license_id == record.license_id)
                    .filter(|l| codec::verify(l, &self.public_key))
                    .unwrap_or(record);
                current.last_validation_utc = now;
                if let Err(e) = self.store.save(&current) {
                    tracing::warn!(error = %e, "Failed to persist validated license");
                }
                pass.force_online = false;
                tracing::debug!(license_id = %current.license_id, "Online validation succeeded");
                LicenseValidationResult::success(current)
            }
            Ok(response) => {
                tracing::info!(
                    license_id = %record.license_id,
                    status = %response.status,
                    "Server rejected license"
                );
                let status = if response.status.allows_use() {
                    LicenseStatus::NotFound
                } else {
                    response.status
                };
                let message = response
                    .message
                    .unwrap_or_else(|| format!("Server reported {}", status));
                LicenseValidationResult::failure(status, message).with_license(record)
            }
            Err(e) if e.is_transient() => {
                let elapsed_days = elapsed.num_days().max(0);
                let grace_days = i64::from(record.offline_grace_days);
                if elapsed_days < grace_days {
                    tracing::warn!(
                        error = %e,
                        elapsed_days,
                        "License server unreachable; using offline grace period"
                    );
                    LicenseValidationResult::grace(record, grace_days - elapsed_days)
                } else {
                    tracing::warn!(
                        error = %e,
                        elapsed_days,
                        grace_days,
                        "License server unreachable and grace period exhausted"
                    );
                    LicenseValidationResult::failure(
                        LicenseStatus::ServerUnreachable,
                        format!(
                            "License server unreachable for {} day(s); connect to re-validate",
                            elapsed_days
                        ),
                    )
                    .with_license(record)
                }
            }
            Err(e) => LicenseValidationResult::failure(e.as_status(), e.message).with_license(record),
        }
    }

    /// Activate `key` on this machine and install the signed record.
    pub async fn activate(&self, key: &str) -> LicenseValidationResult {
        let Some(key) = KeyFormat::normalize(key) else {
            return LicenseValidationResult::failure(
                LicenseStatus::InvalidKey,
                "License key must look like XXXXX-XXXXX-XXXXX-XXXXX-XXXXX",
            );
        };
        if self.is_tampered() {
            return tampered_result();
        }

        let mut pass = self.pass.lock().await;

        let identity = self.current_identity().await;
        self.publish_hardware_id(&identity);
        if !identity.is_valid {
            return LicenseValidationResult::failure(
                LicenseStatus::HardwareMismatch,
                format!(
                    "Not enough hardware information to bind a license (score {})",
                    identity.score
                ),
            );
        }

        tracing::info!(key = %KeyFormat::mask(&key), "Activating license");
        let request = ActivateRequest {
            license_key: key,
            hardware_id: identity.hashed_id.clone(),
            hardware_id_short: identity.short_id.clone(),
            machine_name: self.machine_name.clone(),
            components_hash: identity.raw_components.clone(),
            os_version: probe::os_version(),
            app_version: self.options.app_version.clone(),
        };

        let mut record = match self.api.activate(&request).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Activation failed");
                return LicenseValidationResult::failure(e.as_status(), e.message);
            }
        };

        if !codec::verify(&record, &self.public_key) {
            tracing::error!(license_id = %record.license_id, "Server returned a license with a bad signature");
            return LicenseValidationResult::failure(
                LicenseStatus::InvalidSignature,
                "Server returned a license with an invalid signature",
            );
        }
        if record
            .find_activation(&identity.hashed_id, Some(&identity.raw_components))
            .is_none()
        {
            return LicenseValidationResult::failure(
                LicenseStatus::HardwareMismatch,
                "Server returned a license that is not bound to this machine",
            );
        }

        record.last_validation_utc = Utc::now();
        if let Err(e) = self.store.save(&record) {
            return LicenseValidationResult::failure(
                LicenseStatus::NotFound,
                format!("License activated but could not be saved: {}", e.message),
            );
        }

        pass.force_online = false;
        let mut result = LicenseValidationResult::success(record);
        result.message = "License activated".to_string();
        self.apply(result)
    }

    /// Release this machine's activation and remove the local record.
    pub async fn deactivate(&self) -> LicenseValidationResult {
        if self.is_tampered() {
            return tampered_result();
        }

        let mut pass = self.pass.lock().await;
        let Some(record) = self.store.load() else {
            return LicenseValidationResult::failure(
                LicenseStatus::NotFound,
                "No license is installed",
            );
        };

        if record.is_trial() {
            return self.refusal(
                record,
                "Trial licenses are not registered with the server and cannot be deactivated",
            );
        }

        let identity = self.current_identity().await;
        let hardware_id = record
            .find_activation(&identity.hashed_id, Some(&identity.raw_components))
            .map(|a| a.hardware_id.clone())
            .unwrap_or(identity.hashed_id);

        let request = DeactivateRequest {
            license_id: record.license_id.clone(),
            license_key: record.license_key.clone(),
            hardware_id,
        };

        if let Err(e) = self.api.deactivate(&request).await {
            tracing::warn!(error = %e, "Deactivation failed");
            return LicenseValidationResult::failure(e.as_status(), e.message).with_license(record);
        }

        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Deactivated on server but failed to clear local license");
            self.mark_stale(&record);
            pass.force_online = true;
            return self.apply(LicenseValidationResult::failure(
                LicenseStatus::NotFound,
                format!(
                    "Machine released on the server but the local license could not be removed: {}",
                    e.message
                ),
            ));
        }
        tracing::info!(license_id = %record.license_id, "License deactivated");

        self.apply(LicenseValidationResult::failure(
            LicenseStatus::NotFound,
            "License deactivated",
        ))
    }

    /// Install a local 14-day trial. Never contacts the server and refuses
    /// when any record is already installed.
    pub async fn start_trial(&self) -> LicenseValidationResult {
        if self.is_tampered() {
            return tampered_result();
        }

        let _pass = self.pass.lock().await;
        if let Some(existing) = self.store.load() {
            return self.refusal(existing, "A license is already installed");
        }

        let identity = self.current_identity().await;
        self.publish_hardware_id(&identity);
        let record = LicenseRecord::trial(&identity, &self.machine_name, Utc::now());

        if let Err(e) = self.store.save(&record) {
            return LicenseValidationResult::failure(
                LicenseStatus::NotFound,
                format!("Trial could not be saved: {}", e.message),
            );
        }

        tracing::info!(license_id = %record.license_id, "Trial started");
        let mut result = LicenseValidationResult::success(record);
        result.message = format!(
            "Trial started: {} days remaining",
            crate::types::TRIAL_DURATION_DAYS
        );
        self.apply(result)
    }

    /// Re-validate every `period` until the handle is aborted.
    pub fn spawn_periodic_validation(self: Arc<Self>, period: Duration) -> JoinHandle<()>
    where
        A: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let result = self.validate_current().await;
                tracing::debug!(status = %result.status, "Periodic license validation");
            }
        })
    }

    // ==================== Internals ====================

    /// Record a pass result as the current state and publish it. A tamper
    /// report that raced the pass wins.
    fn apply(&self, result: LicenseValidationResult) -> LicenseValidationResult {
        if self.is_tampered() {
            return tampered_result();
        }

        // Subscribers are woken on status transitions only
        self.snapshot_tx.send_if_modified(|snapshot| {
            let changed = snapshot.status != result.status;
            snapshot.status = result.status;
            snapshot.license = result.license.clone();
            snapshot.grace_days_remaining = result.grace_days_remaining;
            changed
        });
        result
    }

    fn publish_hardware_id(&self, identity: &HardwareIdentity) {
        let short_id = identity.short_id.clone();
        self.snapshot_tx.send_if_modified(|snapshot| {
            snapshot.hardware_id_short = Some(short_id);
            false
        });
    }

    /// Decline an operation without changing state.
    fn refusal(&self, record: LicenseRecord, message: &str) -> LicenseValidationResult {
        let snapshot = self.snapshot_tx.borrow();
        LicenseValidationResult {
            is_valid: snapshot.status.allows_use(),
            status: snapshot.status,
            license: Some(record),
            message: message.to_string(),
            grace_days_remaining: snapshot.grace_days_remaining,
        }
    }

    /// Back-date a record that could not be removed so any later pass, even
    /// after a restart, goes online and learns the seat is gone.
    fn mark_stale(&self, record: &LicenseRecord) {
        let mut stale = record.clone();
        stale.last_validation_utc = DateTime::<Utc>::UNIX_EPOCH;
        if let Err(e) = self.store.save(&stale) {
            tracing::error!(error = %e, "Failed to mark undeletable license as stale");
        }
    }

    async fn current_identity(&self) -> HardwareIdentity {
        let fingerprinter = self.fingerprinter.clone();
        match tokio::task::spawn_blocking(move || fingerprinter.identity()).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(error = %e, "Hardware probe task failed");
                HardwareIdentity::from_components(&HardwareComponentSet::new())
            }
        }
    }
}

impl<A: LicenseApi> std::fmt::Debug for LicenseManager<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseManager")
            .field("status", &self.status())
            .field("machine_name", &self.machine_name)
            .finish()
    }
}

fn tampered_result() -> LicenseValidationResult {
    LicenseValidationResult::failure(
        LicenseStatus::Tampered,
        "Application integrity check failed",
    )
}

fn default_machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
