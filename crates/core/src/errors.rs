//! Error types for the adsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Identity resolution misses are not errors: resolvers return `Ok(None)`.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite local account store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The store refused to write an email already owned by another account.
    #[error("email '{email}' is already used by another account")]
    EmailTaken { email: String },

    /// A login name is already taken.
    #[error("login name '{0}' is already taken")]
    LoginNameTaken(String),

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    /// A stored attribute value could not be (de)serialized.
    #[error("attribute serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Directory errors
// ---------------------------------------------------------------------------

/// Errors from the directory client.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory server could not be reached.
    #[error("directory unavailable at '{url}': {detail}")]
    Unavailable { url: String, detail: String },

    /// A bind was rejected.
    #[error("directory bind failed for '{username}': {detail}")]
    BindFailed { username: String, detail: String },

    /// An operation was attempted before a successful bind.
    #[error("directory connection is not bound")]
    NotBound,

    /// A search failed.
    #[error("directory search failed: {0}")]
    SearchFailed(String),

    /// A modify operation failed.
    #[error("directory modify failed for '{principal}': {detail}")]
    ModifyFailed { principal: String, detail: String },

    /// A value could not be turned into a search filter.
    #[error("invalid directory filter value: {0}")]
    InvalidFilterValue(String),
}

// ---------------------------------------------------------------------------
// Account lifecycle errors
// ---------------------------------------------------------------------------

/// Errors from account lifecycle operations.
#[derive(Debug, Error)]
pub enum AccountError {
    /// The preferred email is owned by another account and the policy
    /// forbids sharing it.
    #[error("email '{email}' is already used by another account")]
    DuplicateEmailConflict { email: String },

    /// A lifecycle operation was called in a state that does not allow it.
    #[error("invalid account state for '{login_name}': {detail}")]
    InvalidAccountState { login_name: String, detail: String },

    /// The account is not allowed to sign in or be synchronized.
    #[error("account '{login_name}' is restricted: {reason}")]
    Restricted { login_name: String, reason: String },

    /// Local store failure.
    #[error("account store error: {0}")]
    Store(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the two batch orchestrators and the single-user path.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Synchronization in this direction is switched off.
    #[error("synchronization is disabled: {0}")]
    Disabled(String),

    /// Another run in the same direction is in progress.
    #[error("synchronization already in progress (started at {started_at})")]
    AlreadyRunning { started_at: String },

    /// The directory connection could not be prepared.
    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(#[source] DirectoryError),

    /// The service account belongs to another domain than the configured one.
    #[error("domain SID mismatch: configured '{configured}', service account has '{actual}'")]
    DomainMismatch { configured: String, actual: String },

    /// A single record could not be synchronized.
    #[error("failed to synchronize '{principal}': {detail}")]
    RecordSyncFailure { principal: String, detail: String },

    /// Account lifecycle error (single-user path).
    #[error("sync account error: {0}")]
    Account(#[from] AccountError),

    /// Directory error outside connection preparation.
    #[error("sync directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Local store error.
    #[error("sync database error: {0}")]
    Database(#[from] DatabaseError),
}

impl SyncError {
    /// Wrap any record-level failure with the principal it happened on.
    pub fn record(principal: &str, err: impl std::fmt::Display) -> Self {
        Self::RecordSyncFailure {
            principal: principal.to_string(),
            detail: err.to_string(),
        }
    }
}
