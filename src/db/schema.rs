use rusqlite::Connection;

/// Initialize the database schema.
///
/// WAL lets readers proceed while a license's activation set is being
/// rewritten inside an IMMEDIATE transaction.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Issued licenses. Timestamps are unix seconds.
        -- signature covers the signable content including the current
        -- activation hardware ids, so it is rewritten whenever they change.
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            license_type TEXT NOT NULL,
            licensee_name TEXT NOT NULL,
            licensee_email TEXT NOT NULL,
            company TEXT,
            issued_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            support_expires_at INTEGER NOT NULL,
            max_machines INTEGER NOT NULL CHECK (max_machines BETWEEN 1 AND 100),
            offline_grace_days INTEGER NOT NULL,
            schema_version INTEGER NOT NULL,
            signature BLOB NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0,
            revoked_at INTEGER,
            revoke_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_created ON licenses(created_at);
        CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(revoked, expires_at);

        -- Machines bound to a license, counted against max_machines
        CREATE TABLE IF NOT EXISTS activations (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            hardware_id TEXT NOT NULL,
            short_id TEXT NOT NULL,
            machine_name TEXT NOT NULL,
            components_hash TEXT NOT NULL,
            os_version TEXT NOT NULL DEFAULT '',
            app_version TEXT NOT NULL DEFAULT '',
            activated_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,

            UNIQUE(license_id, hardware_id)
        );
        CREATE INDEX IF NOT EXISTS idx_activations_license ON activations(license_id);
        "#,
    )
}
