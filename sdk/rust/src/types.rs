//! License data model and wire types shared by the SDK and the server.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::fingerprint::{self, HardwareIdentity, SIMILARITY_THRESHOLD};

/// Version of the signable content layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Signature placeholder carried by locally generated trial records.
pub const TRIAL_SIGNATURE: &[u8] = b"TRIAL-UNSIGNED";

/// Length of the offline trial.
pub const TRIAL_DURATION_DAYS: i64 = 14;

/// 9999-12-31T23:59:59Z, the expiry used by lifetime licenses.
const LIFETIME_EXPIRY_TIMESTAMP: i64 = 253_402_300_799;

/// The sentinel expiry that marks a license as never expiring.
pub fn lifetime_expiry() -> DateTime<Utc> {
    DateTime::from_timestamp(LIFETIME_EXPIRY_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum LicenseType {
    Trial,
    Personal,
    Professional,
    Business,
    Enterprise,
    SubscriptionMonthly,
    SubscriptionYearly,
    Lifetime,
    Educational,
    #[serde(rename = "nfr")]
    #[strum(serialize = "nfr")]
    Nfr,
}

impl LicenseType {
    pub fn is_subscription(&self) -> bool {
        matches!(self, Self::SubscriptionMonthly | Self::SubscriptionYearly)
    }
}

/// Outcome of a validation pass, on the client or on the server.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum LicenseStatus {
    #[default]
    NotFound,
    Valid,
    Expired,
    HardwareMismatch,
    InvalidSignature,
    Revoked,
    MachineLimitExceeded,
    GracePeriod,
    Tampered,
    ServerUnreachable,
    /// The key was rejected for its shape before any I/O happened.
    InvalidKey,
}

impl LicenseStatus {
    /// Statuses under which the application may run.
    pub fn allows_use(&self) -> bool {
        matches!(self, Self::Valid | Self::GracePeriod)
    }
}

/// One machine bound to a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareActivation {
    pub hardware_id: String,
    pub short_id: String,
    pub machine_name: String,
    pub activated_at_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    /// Serialized per-component digest map, compared fuzzily.
    pub components_hash: String,
}

impl HardwareActivation {
    /// Exact hardware id match, or a fuzzy match over component digests.
    pub fn matches(&self, hardware_id: &str, components_hash: Option<&str>) -> bool {
        if self.hardware_id == hardware_id {
            return true;
        }
        match components_hash {
            Some(presented) => {
                fingerprint::similarity_serialized(&self.components_hash, presented)
                    >= SIMILARITY_THRESHOLD
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub license_id: String,
    pub license_key: String,
    #[serde(rename = "type")]
    pub license_type: LicenseType,
    pub licensee_name: String,
    pub licensee_email: String,
    #[serde(default)]
    pub company: Option<String>,
    pub issued_at_utc: DateTime<Utc>,
    pub expires_at_utc: DateTime<Utc>,
    pub support_expiry_utc: DateTime<Utc>,
    pub max_machines: u32,
    pub offline_grace_days: u32,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub activations: Vec<HardwareActivation>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub last_validation_utc: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl LicenseRecord {
    /// Build the local, unsigned trial record for this machine.
    pub fn trial(identity: &HardwareIdentity, machine_name: &str, now: DateTime<Utc>) -> Self {
        let expires = now + Duration::days(TRIAL_DURATION_DAYS);
        Self {
            license_id: format!("trial-{}", uuid::Uuid::new_v4()),
            license_key: String::new(),
            license_type: LicenseType::Trial,
            licensee_name: "Trial User".to_string(),
            licensee_email: String::new(),
            company: None,
            issued_at_utc: now,
            expires_at_utc: expires,
            support_expiry_utc: expires,
            max_machines: 1,
            offline_grace_days: 0,
            schema_version: SCHEMA_VERSION,
            activations: vec![HardwareActivation {
                hardware_id: identity.hashed_id.clone(),
                short_id: identity.short_id.clone(),
                machine_name: machine_name.to_string(),
                activated_at_utc: now,
                last_seen_utc: now,
                components_hash: identity.raw_components.clone(),
            }],
            signature: TRIAL_SIGNATURE.to_vec(),
            last_validation_utc: now,
        }
    }

    /// Trial records carry the unsigned sentinel and skip signature checks.
    pub fn is_trial(&self) -> bool {
        self.license_type == LicenseType::Trial && self.signature == TRIAL_SIGNATURE
    }

    pub fn is_lifetime(&self) -> bool {
        self.expires_at_utc >= lifetime_expiry()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_lifetime() && now > self.expires_at_utc
    }

    pub fn is_support_active(&self, now: DateTime<Utc>) -> bool {
        now <= self.support_expiry_utc
    }

    /// Whole days until expiry, `None` for lifetime licenses.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.is_lifetime() {
            return None;
        }
        Some((self.expires_at_utc - now).num_days().max(0))
    }

    pub fn support_days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.support_expiry_utc - now).num_days().max(0)
    }

    pub fn find_activation(
        &self,
        hardware_id: &str,
        components_hash: Option<&str>,
    ) -> Option<&HardwareActivation> {
        self.activations
            .iter()
            .find(|a| a.hardware_id == hardware_id)
            .or_else(|| {
                self.activations
                    .iter()
                    .find(|a| a.matches(hardware_id, components_hash))
            })
    }
}

/// Normalized outcome of every client and server license operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseValidationResult {
    pub is_valid: bool,
    pub status: LicenseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseRecord>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_days_remaining: Option<i64>,
}

impl LicenseValidationResult {
    pub fn success(license: LicenseRecord) -> Self {
        Self {
            is_valid: true,
            status: LicenseStatus::Valid,
            license: Some(license),
            message: "License is valid".to_string(),
            grace_days_remaining: None,
        }
    }

    pub fn failure(status: LicenseStatus, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            status,
            license: None,
            message: message.into(),
            grace_days_remaining: None,
        }
    }

    pub fn grace(license: LicenseRecord, days_remaining: i64) -> Self {
        Self {
            is_valid: true,
            status: LicenseStatus::GracePeriod,
            license: Some(license),
            message: format!(
                "License server unreachable; offline grace period ends in {} day(s)",
                days_remaining
            ),
            grace_days_remaining: Some(days_remaining),
        }
    }

    /// Attach the record the failure refers to.
    pub fn with_license(mut self, license: LicenseRecord) -> Self {
        self.license = Some(license);
        self
    }
}

/// Summary handed to the UI and feature gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    pub status: LicenseStatus,
    #[serde(rename = "type")]
    pub license_type: Option<LicenseType>,
    pub licensee_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` for lifetime licenses or when nothing is installed.
    pub days_remaining: Option<i64>,
    pub support_days_remaining: Option<i64>,
    pub hardware_id_short: Option<String>,
}

// ==================== Wire protocol ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub license_key: String,
    pub hardware_id: String,
    pub hardware_id_short: String,
    pub machine_name: String,
    pub components_hash: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub app_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateRequest {
    pub license_id: String,
    pub license_key: String,
    pub hardware_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub license_id: String,
    pub license_key: String,
    pub hardware_id: String,
    #[serde(default)]
    pub app_version: String,
    /// Lets the server apply the same fuzzy hardware policy as the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    pub status: LicenseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Current signed record, so renewals reach the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<LicenseRecord>,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
