//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            login_name      TEXT    NOT NULL UNIQUE COLLATE NOCASE,
            email           TEXT    NOT NULL DEFAULT '',
            password_hash   TEXT,
            first_name      TEXT    NOT NULL DEFAULT '',
            last_name       TEXT    NOT NULL DEFAULT '',
            display_name    TEXT    NOT NULL DEFAULT '',
            description     TEXT    NOT NULL DEFAULT '',
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_email ON accounts (email COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS account_meta (
            account_id  INTEGER NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            meta_key    TEXT    NOT NULL,
            meta_value  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            PRIMARY KEY (account_id, meta_key)
        );

        CREATE INDEX IF NOT EXISTS idx_account_meta_key_value ON account_meta (meta_key, meta_value COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS account_attributes (
            account_id  INTEGER NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            local_key   TEXT    NOT NULL,
            value_json  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            PRIMARY KEY (account_id, local_key)
        );

        CREATE TABLE IF NOT EXISTS account_roles (
            account_id  INTEGER NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            role        TEXT    NOT NULL,
            position    INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (account_id, role)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT    NOT NULL,
            direction   TEXT,
            principal   TEXT,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);

        CREATE TABLE IF NOT EXISTS sync_runs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            direction     TEXT    NOT NULL CHECK (direction IN ('directory_to_local', 'local_to_directory')),
            status        TEXT    NOT NULL DEFAULT 'running',
            started_at    TEXT    NOT NULL,
            completed_at  TEXT,
            created       INTEGER NOT NULL DEFAULT 0,
            updated       INTEGER NOT NULL DEFAULT 0,
            skipped       INTEGER NOT NULL DEFAULT 0,
            failed        INTEGER NOT NULL DEFAULT 0,
            elapsed_ms    INTEGER NOT NULL DEFAULT 0,
            details       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_runs_direction ON sync_runs (direction);

        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
