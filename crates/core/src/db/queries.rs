//! Typed query helpers for every table in the adsync database.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{AccountId, AuditEntry, LocalAccount, LocalValue, RoleAssignment, SyncDirection};
use crate::sync::stats::SyncRunStats;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub direction: Option<String>,
    pub principal: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

/// A row from the `sync_runs` table.
#[derive(Debug, Clone)]
pub struct SyncRunEntry {
    pub id: i64,
    pub direction: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub elapsed_ms: u64,
    pub details: Option<String>,
}

/// A local account linked to a directory account name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedAccount {
    pub id: AccountId,
    pub login_name: String,
    pub meta_value: String,
}

const ACCOUNT_COLUMNS: &str =
    "id, login_name, email, first_name, last_name, display_name, description";

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- accounts -----------------------------------------------------------

    /// Insert a new account and return its id.
    ///
    /// Refuses a login name that already exists, and an email already owned
    /// by another account unless `allow_duplicate_email` is set.
    pub fn insert_account(
        &self,
        account: &LocalAccount,
        email: &str,
        allow_duplicate_email: bool,
    ) -> Result<AccountId, DatabaseError> {
        self.transaction(|conn| {
            if account_id_by_login(conn, &account.login_name)?.is_some() {
                return Err(DatabaseError::LoginNameTaken(account.login_name.clone()));
            }
            if !allow_duplicate_email && !email.is_empty() && email_owner(conn, email)?.is_some() {
                return Err(DatabaseError::EmailTaken {
                    email: email.to_string(),
                });
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO accounts (login_name, email, first_name, last_name, display_name,
                 description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    account.login_name,
                    email,
                    account.first_name,
                    account.last_name,
                    account.display_name,
                    account.description,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            write_attributes(conn, id, &account.raw_attributes)?;
            debug!(id, login_name = %account.login_name, "inserted account");
            Ok(id)
        })
    }

    /// Write profile fields and attributes. Attributes not present in
    /// `account.raw_attributes` keep their stored value.
    pub fn update_account(&self, account: &LocalAccount) -> Result<(), DatabaseError> {
        let id = persisted_id(account)?;
        self.transaction(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET first_name = ?1, last_name = ?2, display_name = ?3,
                 description = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    account.first_name,
                    account.last_name,
                    account.display_name,
                    account.description,
                    Utc::now().to_rfc3339(),
                    id
                ],
            )?;
            if changed == 0 {
                return Err(not_found(id));
            }
            write_attributes(conn, id, &account.raw_attributes)?;
            debug!(id, login_name = %account.login_name, "updated account");
            Ok(())
        })
    }

    pub fn set_account_email(
        &self,
        id: AccountId,
        email: &str,
        allow_duplicate_email: bool,
    ) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            if !allow_duplicate_email && !email.is_empty() {
                if let Some(owner) = email_owner(conn, email)? {
                    if owner != id {
                        return Err(DatabaseError::EmailTaken {
                            email: email.to_string(),
                        });
                    }
                }
            }
            let changed = conn.execute(
                "UPDATE accounts SET email = ?1, updated_at = ?2 WHERE id = ?3",
                params![email, Utc::now().to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Err(not_found(id));
            }
            debug!(id, email, "updated account email");
            Ok(())
        })
    }

    /// Hash `password` with bcrypt and store it.
    pub fn set_account_password(&self, id: AccountId, password: &str) -> Result<(), DatabaseError> {
        let hash = bcrypt::hash(password, self.password_cost())?;
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE accounts SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![hash, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(not_found(id));
        }
        debug!(id, "updated account password hash");
        Ok(())
    }

    /// Check `password` against the stored hash. No hash means no match.
    pub fn verify_account_password(
        &self,
        id: AccountId,
        password: &str,
    ) -> Result<bool, DatabaseError> {
        let hash: Option<String> = self
            .conn()
            .query_row(
                "SELECT password_hash FROM accounts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| not_found(id))?;
        match hash {
            Some(hash) => Ok(bcrypt::verify(password, &hash)?),
            None => Ok(false),
        }
    }

    pub fn get_account(&self, id: AccountId) -> Result<Option<LocalAccount>, DatabaseError> {
        let conn = self.conn();
        load_account(&conn, "id = ?1", &id)
    }

    /// Case-insensitive login name lookup.
    pub fn get_account_by_login(&self, login_name: &str) -> Result<Option<LocalAccount>, DatabaseError> {
        let conn = self.conn();
        load_account(&conn, "login_name = ?1 COLLATE NOCASE", &login_name)
    }

    /// Case-insensitive email lookup; the lowest id wins on duplicates.
    pub fn get_account_by_email(&self, email: &str) -> Result<Option<LocalAccount>, DatabaseError> {
        if email.is_empty() {
            return Ok(None);
        }
        let conn = self.conn();
        load_account(&conn, "email = ?1 COLLATE NOCASE", &email)
    }

    /// Account whose meta `key` equals `value` (case-insensitive).
    pub fn get_account_by_meta(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<LocalAccount>, DatabaseError> {
        if value.is_empty() {
            return Ok(None);
        }
        let conn = self.conn();
        let id: Option<AccountId> = conn
            .query_row(
                "SELECT account_id FROM account_meta
                 WHERE meta_key = ?1 AND meta_value = ?2 COLLATE NOCASE
                 ORDER BY account_id LIMIT 1",
                params![key, value],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => load_account(&conn, "id = ?1", &id),
            None => Ok(None),
        }
    }

    /// Owner of `email`, if any account uses it.
    pub fn get_email_owner(&self, email: &str) -> Result<Option<AccountId>, DatabaseError> {
        if email.is_empty() {
            return Ok(None);
        }
        email_owner(&self.conn(), email)
    }

    pub fn list_accounts(&self, limit: u32) -> Result<Vec<LocalAccount>, DatabaseError> {
        let conn = self.conn();
        let ids: Vec<AccountId> = {
            let mut stmt = conn.prepare("SELECT id FROM accounts ORDER BY id LIMIT ?1")?;
            let ids = stmt
                .query_map(params![limit], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(account) = load_account(&conn, "id = ?1", &id)? {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    pub fn count_accounts(&self) -> Result<i64, DatabaseError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count)
    }

    // -- account_meta -------------------------------------------------------

    pub fn get_meta(&self, id: AccountId, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn()
            .query_row(
                "SELECT meta_value FROM account_meta WHERE account_id = ?1 AND meta_key = ?2",
                params![id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upsert a meta value.
    pub fn set_meta(&self, id: AccountId, key: &str, value: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO account_meta (account_id, meta_key, meta_value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id, meta_key) DO UPDATE SET
               meta_value = excluded.meta_value, updated_at = excluded.updated_at",
            params![id, key, value, Utc::now().to_rfc3339()],
        )?;
        debug!(id, key, "set account meta");
        Ok(())
    }

    pub fn delete_meta(&self, id: AccountId, key: &str) -> Result<(), DatabaseError> {
        self.conn().execute(
            "DELETE FROM account_meta WHERE account_id = ?1 AND meta_key = ?2",
            params![id, key],
        )?;
        Ok(())
    }

    /// Every account carrying meta `key`, with its value.
    pub fn list_accounts_with_meta(&self, key: &str) -> Result<Vec<LinkedAccount>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.id, a.login_name, m.meta_value
             FROM accounts a JOIN account_meta m ON m.account_id = a.id
             WHERE m.meta_key = ?1 AND m.meta_value <> ''
             ORDER BY a.id",
        )?;
        let entries = stmt
            .query_map(params![key], |row| {
                Ok(LinkedAccount {
                    id: row.get(0)?,
                    login_name: row.get(1)?,
                    meta_value: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // -- account_roles ------------------------------------------------------

    /// Roles in assignment order.
    pub fn get_roles(&self, id: AccountId) -> Result<Vec<String>, DatabaseError> {
        role_list(&self.conn(), id)
    }

    /// Replace the account's roles.
    pub fn set_roles(&self, id: AccountId, roles: &[String]) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            conn.execute("DELETE FROM account_roles WHERE account_id = ?1", params![id])?;
            for (position, role) in roles.iter().enumerate() {
                conn.execute(
                    "INSERT OR IGNORE INTO account_roles (account_id, role, position)
                     VALUES (?1, ?2, ?3)",
                    params![id, role, position as i64],
                )?;
            }
            debug!(id, roles = ?roles, "set account roles");
            Ok(())
        })
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit-log entry.
    pub fn insert_audit_log(
        &self,
        action: &str,
        direction: Option<&str>,
        principal: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, direction, principal, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![action, direction, principal, details, success, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action, "inserted audit_log entry");
        Ok(id)
    }

    /// Insert an audit entry from a model struct.
    pub fn insert_audit_entry(
        &self,
        entry: &AuditEntry,
        direction: Option<SyncDirection>,
    ) -> Result<i64, DatabaseError> {
        let direction = direction.map(|d| d.to_string());
        self.insert_audit_log(
            &entry.action,
            direction.as_deref(),
            entry.principal.as_deref(),
            Some(&entry.details),
            entry.success,
        )
    }

    /// List recent audit-log entries, optionally filtered by action.
    pub fn list_audit_log(
        &self,
        action: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AuditLogEntry> {
            Ok(AuditLogEntry {
                id: row.get(0)?,
                action: row.get(1)?,
                direction: row.get(2)?,
                principal: row.get(3)?,
                details: row.get(4)?,
                success: row.get(5)?,
                created_at: row.get(6)?,
            })
        };
        let entries = match action {
            Some(action) => conn
                .prepare(
                    "SELECT id, action, direction, principal, details, success, created_at
                     FROM audit_log WHERE action = ?1 ORDER BY id DESC LIMIT ?2",
                )?
                .query_map(params![action, limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => conn
                .prepare(
                    "SELECT id, action, direction, principal, details, success, created_at
                     FROM audit_log ORDER BY id DESC LIMIT ?1",
                )?
                .query_map(params![limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(entries)
    }

    /// Count total audit-log entries.
    pub fn count_audit_log(&self) -> Result<i64, DatabaseError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count audit entries recording a failure.
    pub fn count_failures(&self) -> Result<i64, DatabaseError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM audit_log WHERE success = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- sync_runs ----------------------------------------------------------

    /// Record the start of a pass.
    pub fn start_sync_run(&self, direction: SyncDirection) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sync_runs (direction, status, started_at) VALUES (?1, 'running', ?2)",
            params![direction.to_string(), Utc::now().to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, %direction, "started sync run");
        Ok(id)
    }

    /// Store the final counters of a pass.
    pub fn complete_sync_run(
        &self,
        id: i64,
        status: &str,
        stats: &SyncRunStats,
        details: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE sync_runs SET status = ?1, completed_at = ?2, created = ?3, updated = ?4,
             skipped = ?5, failed = ?6, elapsed_ms = ?7, details = ?8 WHERE id = ?9",
            params![
                status,
                Utc::now().to_rfc3339(),
                stats.created as i64,
                stats.updated as i64,
                stats.skipped as i64,
                stats.failed as i64,
                stats.elapsed_ms() as i64,
                details,
                id
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "sync_run".into(),
                id: id.to_string(),
            });
        }
        debug!(id, status, "completed sync run");
        Ok(())
    }

    /// Most recent runs, newest first, optionally for one direction.
    pub fn list_sync_runs(
        &self,
        direction: Option<SyncDirection>,
        limit: u32,
    ) -> Result<Vec<SyncRunEntry>, DatabaseError> {
        let conn = self.conn();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<SyncRunEntry> {
            Ok(SyncRunEntry {
                id: row.get(0)?,
                direction: row.get(1)?,
                status: row.get(2)?,
                started_at: row.get(3)?,
                completed_at: row.get(4)?,
                created: row.get::<_, i64>(5)? as u64,
                updated: row.get::<_, i64>(6)? as u64,
                skipped: row.get::<_, i64>(7)? as u64,
                failed: row.get::<_, i64>(8)? as u64,
                elapsed_ms: row.get::<_, i64>(9)? as u64,
                details: row.get(10)?,
            })
        };
        let columns = "id, direction, status, started_at, completed_at, created, updated,
                       skipped, failed, elapsed_ms, details";
        let entries = match direction {
            Some(direction) => conn
                .prepare(&format!(
                    "SELECT {columns} FROM sync_runs WHERE direction = ?1 ORDER BY id DESC LIMIT ?2"
                ))?
                .query_map(params![direction.to_string(), limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => conn
                .prepare(&format!(
                    "SELECT {columns} FROM sync_runs ORDER BY id DESC LIMIT ?1"
                ))?
                .query_map(params![limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(entries)
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a key-value state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, value, "set kv_state");
        Ok(())
    }

    /// A state entry parsed as an RFC 3339 timestamp.
    pub fn get_state_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self.get_state(key)?.and_then(|v| {
            DateTime::parse_from_rfc3339(&v)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (callers already hold the lock)
// ---------------------------------------------------------------------------

fn persisted_id(account: &LocalAccount) -> Result<AccountId, DatabaseError> {
    account.id.ok_or_else(|| DatabaseError::NotFound {
        entity: "account".into(),
        id: account.login_name.clone(),
    })
}

fn not_found(id: AccountId) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "account".into(),
        id: id.to_string(),
    }
}

fn account_id_by_login(conn: &Connection, login_name: &str) -> Result<Option<AccountId>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM accounts WHERE login_name = ?1 COLLATE NOCASE",
            params![login_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn email_owner(conn: &Connection, email: &str) -> Result<Option<AccountId>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM accounts WHERE email = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
            params![email],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn write_attributes(
    conn: &Connection,
    id: AccountId,
    attributes: &BTreeMap<String, LocalValue>,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    for (key, value) in attributes {
        let json = serde_json::to_string(value)?;
        conn.execute(
            "INSERT INTO account_attributes (account_id, local_key, value_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id, local_key) DO UPDATE SET
               value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![id, key, json, now],
        )?;
    }
    Ok(())
}

fn role_list(conn: &Connection, id: AccountId) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT role FROM account_roles WHERE account_id = ?1 ORDER BY position, role",
    )?;
    let roles = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(roles)
}

/// Load one account (with roles and attributes) matching `condition`.
fn load_account(
    conn: &Connection,
    condition: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<LocalAccount>, DatabaseError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {condition} ORDER BY id LIMIT 1");
    let account = conn
        .query_row(&sql, &[value], |row| {
            Ok(LocalAccount {
                id: Some(row.get(0)?),
                login_name: row.get(1)?,
                email: row.get(2)?,
                first_name: row.get(3)?,
                last_name: row.get(4)?,
                display_name: row.get(5)?,
                description: row.get(6)?,
                is_new_account: false,
                role_assignment: RoleAssignment::default(),
                raw_attributes: BTreeMap::new(),
            })
        })
        .optional()?;

    let Some(mut account) = account else {
        return Ok(None);
    };
    let id = persisted_id(&account)?;
    account.role_assignment = RoleAssignment {
        roles: role_list(conn, id)?,
    };

    let mut stmt = conn.prepare(
        "SELECT local_key, value_json FROM account_attributes WHERE account_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (key, json) in rows {
        match serde_json::from_str::<LocalValue>(&json) {
            Ok(value) => {
                account.raw_attributes.insert(key, value);
            }
            Err(e) => debug!(id, key = %key, error = %e, "skipping unreadable attribute"),
        }
    }

    Ok(Some(account))
}
