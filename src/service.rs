//! License issuance, machine binding and server-side validation.
//!
//! Every operation that changes a license's activation set runs inside one
//! IMMEDIATE transaction, which takes SQLite's write lock up front. Two
//! machines racing for the last slot therefore see each other's insert and
//! the limit can never be exceeded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rusqlite::{Connection, TransactionBehavior};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use licensegate_sdk::{
    ActivateRequest, DeactivateRequest, KeyFormat, LicenseRecord, LicenseStatus, LicenseType,
    ValidateRequest, codec, fingerprint, lifetime_expiry,
};

use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::models::*;
use crate::pagination::{Paginated, PaginationQuery};

const SECONDS_PER_DAY: i64 = 86_400;
const MAX_MACHINES: std::ops::RangeInclusive<u32> = 1..=100;
const SUPPORT_DAYS: std::ops::RangeInclusive<u32> = 1..=3650;
const TERM_DAYS: std::ops::RangeInclusive<u32> = 1..=36_500;
const MAX_OFFLINE_GRACE_DAYS: u32 = 365;
const KEY_ATTEMPTS: usize = 5;

/// An entitlement decision against the caller. Reported as HTTP 200 with
/// `success: false` / `valid: false` rather than as an error status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    pub status: LicenseStatus,
    pub message: String,
}

impl Refusal {
    fn new(status: LicenseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self::new(LicenseStatus::NotFound, "License not found")
    }
}

pub type Outcome<T> = std::result::Result<T, Refusal>;

#[derive(Clone)]
pub struct LicenseService {
    db: DbPool,
    signing_key: Arc<SigningKey>,
    default_offline_grace_days: u32,
}

impl LicenseService {
    pub fn new(db: DbPool, signing_key: SigningKey, default_offline_grace_days: u32) -> Self {
        Self {
            db,
            signing_key: Arc::new(signing_key),
            default_offline_grace_days,
        }
    }

    /// Base64 public key clients embed to verify records.
    pub fn public_key(&self) -> String {
        codec::encode_public_key(&self.signing_key.verifying_key())
    }

    pub fn default_offline_grace_days(&self) -> u32 {
        self.default_offline_grace_days
    }

    // ============ Admin ============

    pub fn issue(&self, input: &CreateLicense) -> Result<AdminLicense> {
        let licensee_name: String = input.licensee_name.trim().nfc().collect();
        if licensee_name.is_empty() {
            return Err(AppError::BadRequest("licenseeName is required".into()));
        }
        let licensee_email: String = input.licensee_email.trim().to_lowercase().nfc().collect();
        if !licensee_email.contains('@') {
            return Err(AppError::BadRequest(
                "licenseeEmail must be a valid email address".into(),
            ));
        }
        if !MAX_MACHINES.contains(&input.max_machines) {
            return Err(AppError::BadRequest(
                "maxMachines must be between 1 and 100".into(),
            ));
        }
        if !SUPPORT_DAYS.contains(&input.support_duration_days) {
            return Err(AppError::BadRequest(
                "supportDurationDays must be between 1 and 3650".into(),
            ));
        }

        let license_type = input.license_type.unwrap_or(LicenseType::Professional);
        let now = Utc::now().timestamp();
        let expires_at = match (license_type, input.duration_days) {
            (LicenseType::Trial, _) => {
                return Err(AppError::BadRequest(
                    "Trial licenses are started offline by the client".into(),
                ));
            }
            (LicenseType::Lifetime, Some(_)) => {
                return Err(AppError::BadRequest(
                    "durationDays does not apply to lifetime licenses".into(),
                ));
            }
            (LicenseType::Lifetime, None) => lifetime_expiry().timestamp(),
            (other, days) => {
                let days = days.unwrap_or_else(|| default_term_days(other));
                if !TERM_DAYS.contains(&days) {
                    return Err(AppError::BadRequest(
                        "durationDays must be between 1 and 36500".into(),
                    ));
                }
                now + i64::from(days) * SECONDS_PER_DAY
            }
        };

        let offline_grace_days = input
            .offline_grace_days
            .unwrap_or(self.default_offline_grace_days);
        if offline_grace_days > MAX_OFFLINE_GRACE_DAYS {
            return Err(AppError::BadRequest(
                "offlineGraceDays must be at most 365".into(),
            ));
        }

        let company = input
            .company
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.nfc().collect::<String>());

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let new_license = NewLicense {
            license_key: unique_license_key(&tx)?,
            license_type,
            licensee_name,
            licensee_email,
            company,
            issued_at: now,
            expires_at,
            support_expires_at: now + i64::from(input.support_duration_days) * SECONDS_PER_DAY,
            max_machines: input.max_machines,
            offline_grace_days,
        };
        let id = Uuid::new_v4().to_string();
        let mut license = queries::create_license(&tx, &id, &new_license, &[])?;
        self.resign(&tx, &mut license, &[])?;
        tx.commit()?;

        tracing::info!(
            license_id = %license.id,
            key = %KeyFormat::mask(&license.license_key),
            license_type = %license.license_type,
            max_machines = license.max_machines,
            "License issued"
        );
        Ok(AdminLicense::new(&license, &[], Utc::now()))
    }

    pub fn get(&self, id: &str) -> Result<AdminLicense> {
        let conn = self.db.get()?;
        let license = find_license(&conn, id)?;
        let activations = queries::list_activations(&conn, &license.id)?;
        Ok(AdminLicense::new(&license, &activations, Utc::now()))
    }

    pub fn list(&self, query: &PaginationQuery) -> Result<Paginated<AdminLicense>> {
        let conn = self.db.get()?;
        let (licenses, total) = queries::list_licenses_paginated(
            &conn,
            query.status,
            query.page_size(),
            query.offset(),
        )?;

        let now = Utc::now();
        let items = licenses
            .iter()
            .map(|license| -> Result<AdminLicense> {
                let activations = queries::list_activations(&conn, &license.id)?;
                Ok(AdminLicense::new(license, &activations, now))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Paginated::new(items, total, query.page(), query.page_size()))
    }

    pub fn revoke(&self, id: &str, reason: Option<&str>) -> Result<AdminLicense> {
        let conn = self.db.get()?;
        let license = find_license(&conn, id)?;
        if license.revoked {
            return Err(AppError::Conflict("License is already revoked".into()));
        }
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        queries::revoke_license(&conn, &license.id, reason)?;
        tracing::info!(license_id = %license.id, reason = ?reason, "License revoked");
        self.get(id)
    }

    pub fn restore(&self, id: &str) -> Result<AdminLicense> {
        let conn = self.db.get()?;
        let license = find_license(&conn, id)?;
        if !license.revoked {
            return Err(AppError::Conflict("License is not revoked".into()));
        }
        queries::restore_license(&conn, &license.id)?;
        tracing::info!(license_id = %license.id, "License restored");
        self.get(id)
    }

    /// Extends support from the later of now and the current support expiry.
    pub fn renew_support(&self, id: &str, duration_days: u32) -> Result<AdminLicense> {
        if !SUPPORT_DAYS.contains(&duration_days) {
            return Err(AppError::BadRequest(
                "durationDays must be between 1 and 3650".into(),
            ));
        }
        let conn = self.db.get()?;
        let license = find_license(&conn, id)?;
        let base = license.support_expires_at.max(Utc::now().timestamp());
        let support_expires_at = base + i64::from(duration_days) * SECONDS_PER_DAY;
        queries::update_support_expiry(&conn, &license.id, support_expires_at)?;
        tracing::info!(license_id = %license.id, duration_days, "Support renewed");
        self.get(id)
    }

    /// Admin-forced release of one machine, freeing its slot.
    pub fn release_activation(&self, id: &str, hardware_id: &str) -> Result<AdminLicense> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut license = find_license(&tx, id)?;
        if !queries::delete_activation(&tx, &license.id, hardware_id)? {
            return Err(AppError::NotFound("Activation not found".into()));
        }
        let activations = queries::list_activations(&tx, &license.id)?;
        self.resign(&tx, &mut license, &activations)?;
        tx.commit()?;

        tracing::info!(
            license_id = %license.id,
            hardware_id = %fingerprint::short_form(hardware_id),
            "Activation released by admin"
        );
        Ok(AdminLicense::new(&license, &activations, Utc::now()))
    }

    // ============ Client protocol ============

    /// Bind the presenting machine to the license and return the re-signed
    /// record. A machine already on the license (exactly, or within the
    /// fuzzy similarity threshold) does not consume another slot.
    pub fn activate(&self, request: &ActivateRequest) -> Result<Outcome<LicenseRecord>> {
        let key = parse_key(&request.license_key)?;
        require("hardwareId", &request.hardware_id)?;

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut license) = queries::get_license_by_key(&tx, &key)? else {
            tracing::info!(key = %KeyFormat::mask(&key), "Activation for unknown key");
            return Ok(Err(Refusal::new(
                LicenseStatus::NotFound,
                "License key not found",
            )));
        };
        let now = Utc::now();
        if let Err(refusal) = check_entitlement(&license, now) {
            return Ok(Err(refusal));
        }

        let short_id = if request.hardware_id_short.is_empty() {
            fingerprint::short_form(&request.hardware_id)
        } else {
            request.hardware_id_short.clone()
        };
        let machine = NewActivation {
            hardware_id: &request.hardware_id,
            short_id: &short_id,
            machine_name: &request.machine_name,
            components_hash: &request.components_hash,
            os_version: &request.os_version,
            app_version: &request.app_version,
        };

        let activations = queries::list_activations(&tx, &license.id)?;
        let existing = find_activation(
            &license,
            &activations,
            &request.hardware_id,
            Some(&request.components_hash),
            now,
        );

        match existing {
            Some(activation) if activation.hardware_id == request.hardware_id => {
                queries::touch_activation(&tx, &activation.id, Some(&request.app_version))?;
                let activations = queries::list_activations(&tx, &license.id)?;
                tx.commit()?;
                tracing::info!(
                    license_id = %license.id,
                    machine = %short_id,
                    "Machine re-activated"
                );
                return Ok(Ok(license.to_record(&activations, now)));
            }
            Some(activation) => {
                tracing::info!(
                    license_id = %license.id,
                    from = %activation.short_id,
                    to = %short_id,
                    "Rebinding drifted machine"
                );
                queries::rebind_activation(&tx, &activation.id, &machine)?;
            }
            None => {
                let used = queries::count_activations(&tx, &license.id)?;
                if used >= license.max_machines {
                    tracing::info!(
                        license_id = %license.id,
                        used,
                        max = license.max_machines,
                        "Activation refused: machine limit reached"
                    );
                    return Ok(Err(Refusal::new(
                        LicenseStatus::MachineLimitExceeded,
                        format!(
                            "Machine limit reached ({} of {}). Deactivate another machine first.",
                            used, license.max_machines
                        ),
                    )));
                }
                queries::create_activation(&tx, &license.id, &machine)?;
            }
        }

        let activations = queries::list_activations(&tx, &license.id)?;
        self.resign(&tx, &mut license, &activations)?;
        tx.commit()?;

        tracing::info!(
            license_id = %license.id,
            key = %KeyFormat::mask(&key),
            machine = %short_id,
            machines = activations.len(),
            "Machine activated"
        );
        Ok(Ok(license.to_record(&activations, now)))
    }

    pub fn deactivate(&self, request: &DeactivateRequest) -> Result<Outcome<()>> {
        let key = parse_key(&request.license_key)?;
        require("licenseId", &request.license_id)?;
        require("hardwareId", &request.hardware_id)?;

        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut license) = queries::get_license_by_id(&tx, &request.license_id)?
            .filter(|l| l.license_key == key)
        else {
            return Ok(Err(Refusal::not_found()));
        };
        if !queries::delete_activation(&tx, &license.id, &request.hardware_id)? {
            return Ok(Err(Refusal::new(
                LicenseStatus::HardwareMismatch,
                "This machine is not activated on the license",
            )));
        }
        let activations = queries::list_activations(&tx, &license.id)?;
        self.resign(&tx, &mut license, &activations)?;
        tx.commit()?;

        tracing::info!(
            license_id = %license.id,
            machine = %fingerprint::short_form(&request.hardware_id),
            remaining = activations.len(),
            "Machine deactivated"
        );
        Ok(Ok(()))
    }

    /// Authoritative check of the license for the presenting machine. The
    /// client's own view of its status is never trusted.
    pub fn validate(&self, request: &ValidateRequest) -> Result<Outcome<LicenseRecord>> {
        let key = parse_key(&request.license_key)?;
        require("licenseId", &request.license_id)?;
        require("hardwareId", &request.hardware_id)?;

        let conn = self.db.get()?;
        let Some(license) = queries::get_license_by_id(&conn, &request.license_id)?
            .filter(|l| l.license_key == key)
        else {
            return Ok(Err(Refusal::not_found()));
        };
        let now = Utc::now();
        if let Err(refusal) = check_entitlement(&license, now) {
            return Ok(Err(refusal));
        }

        let activations = queries::list_activations(&conn, &license.id)?;
        let Some(activation) = find_activation(
            &license,
            &activations,
            &request.hardware_id,
            request.components_hash.as_deref(),
            now,
        ) else {
            tracing::info!(
                license_id = %license.id,
                machine = %fingerprint::short_form(&request.hardware_id),
                "Validation from unknown machine"
            );
            return Ok(Err(Refusal::new(
                LicenseStatus::HardwareMismatch,
                "License is not activated on this machine",
            )));
        };
        queries::touch_activation(&conn, &activation.id, Some(&request.app_version))?;

        let activations = queries::list_activations(&conn, &license.id)?;
        Ok(Ok(license.to_record(&activations, now)))
    }

    fn resign(
        &self,
        conn: &Connection,
        license: &mut License,
        activations: &[Activation],
    ) -> Result<()> {
        let record = license.to_record(activations, Utc::now());
        license.signature = codec::sign(&record, &self.signing_key);
        queries::update_license_signature(conn, &license.id, &license.signature)?;
        Ok(())
    }
}

fn find_license(conn: &Connection, id: &str) -> Result<License> {
    queries::get_license_by_id(conn, id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))
}

/// Revocation wins over expiry.
fn check_entitlement(license: &License, now: DateTime<Utc>) -> Outcome<()> {
    if license.revoked {
        return Err(Refusal::new(
            LicenseStatus::Revoked,
            "License has been revoked",
        ));
    }
    if license.is_expired(now) {
        return Err(Refusal::new(
            LicenseStatus::Expired,
            format!(
                "License expired on {}",
                to_utc(license.expires_at).format("%Y-%m-%d")
            ),
        ));
    }
    Ok(())
}

/// Same matching policy as the client: exact hardware id first, then the
/// weighted component similarity threshold.
fn find_activation<'a>(
    license: &License,
    activations: &'a [Activation],
    hardware_id: &str,
    components_hash: Option<&str>,
    now: DateTime<Utc>,
) -> Option<&'a Activation> {
    let record = license.to_record(activations, now);
    let matched = record.find_activation(hardware_id, components_hash)?;
    activations
        .iter()
        .find(|a| a.hardware_id == matched.hardware_id)
}

fn parse_key(raw: &str) -> Result<String> {
    KeyFormat::normalize(raw).ok_or_else(|| {
        AppError::BadRequest("licenseKey must look like XXXXX-XXXXX-XXXXX-XXXXX-XXXXX".into())
    })
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

fn default_term_days(license_type: LicenseType) -> u32 {
    match license_type {
        LicenseType::SubscriptionMonthly => 30,
        _ => 365,
    }
}

fn unique_license_key(conn: &Connection) -> Result<String> {
    for _ in 0..KEY_ATTEMPTS {
        let key = KeyFormat::generate();
        if !queries::license_key_exists(conn, &key)? {
            return Ok(key);
        }
    }
    Err(AppError::Internal(
        "Failed to generate a unique license key".into(),
    ))
}
