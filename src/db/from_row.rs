//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// Corrupt enum values surface as a query error instead of a panic.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const LICENSE_COLS: &str = "id, license_key, license_type, licensee_name, licensee_email, company, issued_at, expires_at, support_expires_at, max_machines, offline_grace_days, schema_version, signature, revoked, revoked_at, revoke_reason, created_at, updated_at";

pub const ACTIVATION_COLS: &str = "id, license_id, hardware_id, short_id, machine_name, components_hash, os_version, app_version, activated_at, last_seen_at";

// ============ FromRow Implementations ============

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            license_key: row.get(1)?,
            license_type: parse_enum(row, 2, "license_type")?,
            licensee_name: row.get(3)?,
            licensee_email: row.get(4)?,
            company: row.get(5)?,
            issued_at: row.get(6)?,
            expires_at: row.get(7)?,
            support_expires_at: row.get(8)?,
            max_machines: row.get(9)?,
            offline_grace_days: row.get(10)?,
            schema_version: row.get(11)?,
            signature: row.get(12)?,
            revoked: row.get::<_, i32>(13)? != 0,
            revoked_at: row.get(14)?,
            revoke_reason: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }
}

impl FromRow for Activation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Activation {
            id: row.get(0)?,
            license_id: row.get(1)?,
            hardware_id: row.get(2)?,
            short_id: row.get(3)?,
            machine_name: row.get(4)?,
            components_hash: row.get(5)?,
            os_version: row.get(6)?,
            app_version: row.get(7)?,
            activated_at: row.get(8)?,
            last_seen_at: row.get(9)?,
        })
    }
}
