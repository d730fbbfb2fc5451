use chrono::Utc;
use rusqlite::{Connection, params, types::Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::pagination::StatusFilter;

use super::from_row::{ACTIVATION_COLS, FromRow, LICENSE_COLS, query_all, query_one};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    /// Set a column to an explicit value (including NULL).
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Licenses ============

/// Insert a license with a pre-allocated id and its initial signature.
pub fn create_license(
    conn: &Connection,
    id: &str,
    input: &NewLicense,
    signature: &[u8],
) -> Result<License> {
    let now = now();
    conn.execute(
        "INSERT INTO licenses (id, license_key, license_type, licensee_name, licensee_email, company,
                               issued_at, expires_at, support_expires_at, max_machines,
                               offline_grace_days, schema_version, signature, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            id,
            &input.license_key,
            input.license_type.as_ref(),
            &input.licensee_name,
            &input.licensee_email,
            &input.company,
            input.issued_at,
            input.expires_at,
            input.support_expires_at,
            input.max_machines,
            input.offline_grace_days,
            licensegate_sdk::SCHEMA_VERSION,
            signature,
            now,
        ],
    )?;

    Ok(License {
        id: id.to_string(),
        license_key: input.license_key.clone(),
        license_type: input.license_type,
        licensee_name: input.licensee_name.clone(),
        licensee_email: input.licensee_email.clone(),
        company: input.company.clone(),
        issued_at: input.issued_at,
        expires_at: input.expires_at,
        support_expires_at: input.support_expires_at,
        max_machines: input.max_machines,
        offline_grace_days: input.offline_grace_days,
        schema_version: licensegate_sdk::SCHEMA_VERSION,
        signature: signature.to_vec(),
        revoked: false,
        revoked_at: None,
        revoke_reason: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
        &[&license_key],
    )
}

pub fn license_key_exists(conn: &Connection, license_key: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE license_key = ?1",
        params![license_key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// List licenses newest first, optionally restricted to one status bucket.
/// Returns (licenses, total_count).
pub fn list_licenses_paginated(
    conn: &Connection,
    status: Option<StatusFilter>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<License>, i64)> {
    let now = now();
    let (filter, filter_params): (&str, Vec<Value>) = match status {
        None => ("", vec![]),
        Some(StatusFilter::Active) => (
            "WHERE revoked = 0 AND expires_at >= ?",
            vec![now.into()],
        ),
        Some(StatusFilter::Expired) => (
            "WHERE revoked = 0 AND expires_at < ?",
            vec![now.into()],
        ),
        Some(StatusFilter::Revoked) => ("WHERE revoked = 1", vec![]),
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM licenses {}", filter),
        rusqlite::params_from_iter(filter_params.iter()),
        |row| row.get(0),
    )?;

    let mut page_params = filter_params;
    page_params.push(limit.into());
    page_params.push(offset.into());
    let sql = format!(
        "SELECT {} FROM licenses {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        LICENSE_COLS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let licenses = stmt
        .query_map(rusqlite::params_from_iter(page_params.iter()), License::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((licenses, total))
}

pub fn update_license_signature(conn: &Connection, id: &str, signature: &[u8]) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set("signature", signature.to_vec())
        .execute(conn)
}

pub fn revoke_license(conn: &Connection, id: &str, reason: Option<&str>) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set("revoked", 1)
        .set("revoked_at", now())
        .set_nullable("revoke_reason", reason.map(String::from))
        .execute(conn)
}

pub fn restore_license(conn: &Connection, id: &str) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set("revoked", 0)
        .set_nullable::<i64>("revoked_at", None)
        .set_nullable::<String>("revoke_reason", None)
        .execute(conn)
}

pub fn update_support_expiry(conn: &Connection, id: &str, support_expires_at: i64) -> Result<bool> {
    UpdateBuilder::new("licenses", id)
        .with_updated_at()
        .set("support_expires_at", support_expires_at)
        .execute(conn)
}

// ============ Activations ============

/// Activations in insertion order, the order the signature covers.
pub fn list_activations(conn: &Connection, license_id: &str) -> Result<Vec<Activation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_id = ?1 ORDER BY rowid",
            ACTIVATION_COLS
        ),
        &[&license_id],
    )
}

pub fn count_activations(conn: &Connection, license_id: &str) -> Result<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM activations WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn create_activation(
    conn: &Connection,
    license_id: &str,
    input: &NewActivation<'_>,
) -> Result<Activation> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO activations (id, license_id, hardware_id, short_id, machine_name, components_hash,
                                  os_version, app_version, activated_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            &id,
            license_id,
            input.hardware_id,
            input.short_id,
            input.machine_name,
            input.components_hash,
            input.os_version,
            input.app_version,
            now,
        ],
    )?;

    Ok(Activation {
        id,
        license_id: license_id.to_string(),
        hardware_id: input.hardware_id.to_string(),
        short_id: input.short_id.to_string(),
        machine_name: input.machine_name.to_string(),
        components_hash: input.components_hash.to_string(),
        os_version: input.os_version.to_string(),
        app_version: input.app_version.to_string(),
        activated_at: now,
        last_seen_at: now,
    })
}

/// Record that an activated machine checked in.
pub fn touch_activation(conn: &Connection, id: &str, app_version: Option<&str>) -> Result<bool> {
    let mut update = UpdateBuilder::new("activations", id).set("last_seen_at", now());
    if let Some(version) = app_version.filter(|v| !v.is_empty()) {
        update = update.set("app_version", version.to_string());
    }
    update.execute(conn)
}

/// Move an activation onto a drifted machine's new identity.
pub fn rebind_activation(
    conn: &Connection,
    id: &str,
    input: &NewActivation<'_>,
) -> Result<bool> {
    UpdateBuilder::new("activations", id)
        .set("hardware_id", input.hardware_id.to_string())
        .set("short_id", input.short_id.to_string())
        .set("machine_name", input.machine_name.to_string())
        .set("components_hash", input.components_hash.to_string())
        .set("os_version", input.os_version.to_string())
        .set("app_version", input.app_version.to_string())
        .set("last_seen_at", now())
        .execute(conn)
}

pub fn delete_activation(conn: &Connection, license_id: &str, hardware_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM activations WHERE license_id = ?1 AND hardware_id = ?2",
        params![license_id, hardware_id],
    )?;
    Ok(deleted > 0)
}
