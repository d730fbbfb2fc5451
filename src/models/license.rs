use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use licensegate_sdk::{
    HardwareActivation, LicenseRecord, LicenseStatus, LicenseType, lifetime_expiry,
};

/// Unix seconds to UTC. Out-of-range values clamp to the epoch.
pub fn to_utc(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// A row of the `licenses` table.
#[derive(Debug, Clone)]
pub struct License {
    pub id: String,
    pub license_key: String,
    pub license_type: LicenseType,
    pub licensee_name: String,
    pub licensee_email: String,
    pub company: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub support_expires_at: i64,
    pub max_machines: u32,
    pub offline_grace_days: u32,
    pub schema_version: u32,
    /// Ed25519 signature over the record with its current activations
    pub signature: Vec<u8>,
    pub revoked: bool,
    pub revoked_at: Option<i64>,
    pub revoke_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// Server-side entitlement status, ignoring hardware.
    pub fn status(&self, now: DateTime<Utc>) -> LicenseStatus {
        if self.revoked {
            LicenseStatus::Revoked
        } else if self.is_expired(now) {
            LicenseStatus::Expired
        } else {
            LicenseStatus::Valid
        }
    }

    /// Lifetime licenses carry the sentinel expiry and never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let expires = to_utc(self.expires_at);
        expires < lifetime_expiry() && now > expires
    }

    /// The wire form handed to clients. `activations` must be in row order
    /// so the stored signature covers the same hardware id list.
    pub fn to_record(&self, activations: &[Activation], now: DateTime<Utc>) -> LicenseRecord {
        LicenseRecord {
            license_id: self.id.clone(),
            license_key: self.license_key.clone(),
            license_type: self.license_type,
            licensee_name: self.licensee_name.clone(),
            licensee_email: self.licensee_email.clone(),
            company: self.company.clone(),
            issued_at_utc: to_utc(self.issued_at),
            expires_at_utc: to_utc(self.expires_at),
            support_expiry_utc: to_utc(self.support_expires_at),
            max_machines: self.max_machines,
            offline_grace_days: self.offline_grace_days,
            schema_version: self.schema_version,
            activations: activations.iter().map(Activation::to_hardware).collect(),
            signature: self.signature.clone(),
            last_validation_utc: now,
        }
    }
}

/// A row of the `activations` table: one machine bound to a license.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub id: String,
    pub license_id: String,
    pub hardware_id: String,
    pub short_id: String,
    pub machine_name: String,
    pub components_hash: String,
    pub os_version: String,
    pub app_version: String,
    pub activated_at: i64,
    pub last_seen_at: i64,
}

impl Activation {
    pub fn to_hardware(&self) -> HardwareActivation {
        HardwareActivation {
            hardware_id: self.hardware_id.clone(),
            short_id: self.short_id.clone(),
            machine_name: self.machine_name.clone(),
            activated_at_utc: to_utc(self.activated_at),
            last_seen_utc: to_utc(self.last_seen_at),
            components_hash: self.components_hash.clone(),
        }
    }
}

/// Validated fields for a new license row.
#[derive(Debug, Clone)]
pub struct NewLicense {
    pub license_key: String,
    pub license_type: LicenseType,
    pub licensee_name: String,
    pub licensee_email: String,
    pub company: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub support_expires_at: i64,
    pub max_machines: u32,
    pub offline_grace_days: u32,
}

#[derive(Debug, Clone)]
pub struct NewActivation<'a> {
    pub hardware_id: &'a str,
    pub short_id: &'a str,
    pub machine_name: &'a str,
    pub components_hash: &'a str,
    pub os_version: &'a str,
    pub app_version: &'a str,
}

// ============ Admin API payloads ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLicense {
    pub licensee_name: String,
    pub licensee_email: String,
    #[serde(default)]
    pub company: Option<String>,
    /// Defaults to `professional`
    #[serde(default)]
    pub license_type: Option<LicenseType>,
    pub max_machines: u32,
    pub support_duration_days: u32,
    /// License term for non-lifetime types. Defaults per type.
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub offline_grace_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeLicense {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewSupport {
    pub duration_days: u32,
}

/// Admin view: the signed record plus server-only state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLicense {
    #[serde(flatten)]
    pub record: LicenseRecord,
    pub status: LicenseStatus,
    pub activation_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
}

impl AdminLicense {
    pub fn new(license: &License, activations: &[Activation], now: DateTime<Utc>) -> Self {
        Self {
            record: license.to_record(activations, now),
            status: license.status(now),
            activation_count: activations.len(),
            revoked_at: license.revoked_at.map(to_utc),
            revoke_reason: license.revoke_reason.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateLicenseResponse {
    pub success: bool,
    pub license: AdminLicense,
}
