//! TOML-based configuration for adsync.
//!
//! Service-account passwords are never stored in the file: `*_password_env`
//! fields name environment variables that are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].
//!
//! The sync core never reads [`AppConfig`] directly. It asks a
//! [`ConfigurationProvider`] for typed option values on every call, so an
//! operator can change policies (for example the duplicate email policy)
//! between runs by reloading the [`ConfigStore`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attributes::{AttributeWhitelist, AttributeWhitelistEntry};
use crate::directory::sid::ObjectSid;
use crate::errors::ConfigError;
use crate::roles::RoleEquivalence;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon / scheduling settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Directory server settings.
    pub directory: DirectoryConfig,

    /// Directory -> local pass settings.
    #[serde(default)]
    pub sync_to_local: SyncToLocalConfig,

    /// Local -> directory pass settings.
    #[serde(default)]
    pub sync_to_directory: SyncToDirectoryConfig,

    /// Group to role equivalences.
    #[serde(default)]
    pub roles: RolesConfig,

    /// Attribute whitelist.
    #[serde(default)]
    pub attributes: Vec<AttributeWhitelistEntry>,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Daemon / scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between scheduled passes (default 3600).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the account database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_poll_interval() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/adsync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl DaemonConfig {
    /// Path of the SQLite account database inside `data_dir`.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("adsync.db")
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Directory server connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// LDAP URL (e.g. `ldaps://dc01.corp.example.com:636`).
    pub url: String,

    /// Search base DN (e.g. `DC=corp,DC=example,DC=com`).
    pub base_dn: String,

    /// Suffix appended to bare account names when binding
    /// (e.g. `@corp.example.com`).
    #[serde(default)]
    pub account_suffix: String,

    /// SID of the domain the service accounts must belong to.
    #[serde(default)]
    pub domain_sid: Option<String>,

    /// Connection timeout in seconds (default 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Sync to local
// ---------------------------------------------------------------------------

/// What to do when a preferred email already belongs to another account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateEmailPolicy {
    /// Refuse the write.
    #[default]
    Prevent,
    /// Write the duplicate anyway.
    Allow,
    /// Synthesize a unique variant for accounts without an email.
    Create,
}

/// Directory -> local pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncToLocalConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Service account used to enumerate the directory.
    #[serde(default)]
    pub service_account: String,

    /// Environment variable holding the service account password.
    #[serde(default)]
    pub service_password_env: String,

    /// Security groups whose members are synchronized.
    #[serde(default)]
    pub security_groups: Vec<String>,

    /// Import accounts that are disabled in the directory.
    #[serde(default)]
    pub import_disabled_users: bool,

    /// Use sAMAccountName instead of userPrincipalName as the login name of
    /// new accounts.
    #[serde(default)]
    pub use_sam_account_name_for_new_users: bool,

    #[serde(default)]
    pub auto_update_description: bool,

    /// Store the password of a successful directory login locally.
    #[serde(default)]
    pub auto_update_password: bool,

    /// Update the local email of existing accounts.
    #[serde(default = "default_true")]
    pub update_email: bool,

    /// Domain used to build `login@domain` when the directory has no `mail`.
    #[serde(default)]
    pub default_email_domain: Option<String>,

    #[serde(default)]
    pub duplicate_email_policy: DuplicateEmailPolicy,

    /// Replace roles instead of adding to them.
    #[serde(default)]
    pub clean_existing_roles: bool,

    /// Role given to new accounts that match no equivalence.
    #[serde(default)]
    pub default_role: Option<String>,

    /// Let smartcard-only accounts through the restriction check.
    #[serde(default)]
    pub allow_smartcard_users: bool,

    /// Execution budget requested from the host before a pass (seconds).
    #[serde(default = "default_execution_time_limit")]
    pub execution_time_limit_secs: u64,

    /// Resolved service password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub service_password: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_execution_time_limit() -> u64 {
    3000
}

impl Default for SyncToLocalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_account: String::new(),
            service_password_env: String::new(),
            security_groups: Vec::new(),
            import_disabled_users: false,
            use_sam_account_name_for_new_users: false,
            auto_update_description: false,
            auto_update_password: false,
            update_email: true,
            default_email_domain: None,
            duplicate_email_policy: DuplicateEmailPolicy::default(),
            clean_existing_roles: false,
            default_role: None,
            allow_smartcard_users: false,
            execution_time_limit_secs: default_execution_time_limit(),
            service_password: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync to directory
// ---------------------------------------------------------------------------

/// Local -> directory pass settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncToDirectoryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Write-capable service account.
    #[serde(default)]
    pub service_account: String,

    #[serde(default)]
    pub service_password_env: String,

    #[serde(skip)]
    pub service_password: Option<String>,
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Group to role equivalences, in `"Group=role"` form, evaluated in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default)]
    pub equivalences: Vec<String>,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(attributes = config.attributes.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the `*_password_env` fields from environment variables.
    ///
    /// A missing variable only logs a warning: the pass that needs the
    /// password fails its bind later, the other pass keeps working.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if !self.sync_to_local.service_password_env.is_empty() {
            self.sync_to_local.service_password = resolve_optional_env(
                &self.sync_to_local.service_password_env,
                "sync_to_local.service_password_env",
            );
        }
        if !self.sync_to_directory.service_password_env.is_empty() {
            self.sync_to_directory.service_password = resolve_optional_env(
                &self.sync_to_directory.service_password_env,
                "sync_to_directory.service_password_env",
            );
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Like [`resolve_env_vars`](Self::resolve_env_vars), but every enabled
    /// pass must have its password available.
    pub fn require_env_vars(&mut self) -> Result<(), ConfigError> {
        self.resolve_env_vars()?;
        if self.sync_to_local.enabled && self.sync_to_local.service_password.is_none() {
            return Err(ConfigError::EnvVarMissing {
                var: self.sync_to_local.service_password_env.clone(),
                field: "sync_to_local.service_password_env".into(),
            });
        }
        if self.sync_to_directory.enabled && self.sync_to_directory.service_password.is_none() {
            return Err(ConfigError::EnvVarMissing {
                var: self.sync_to_directory.service_password_env.clone(),
                field: "sync_to_directory.service_password_env".into(),
            });
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.url.is_empty() {
            return Err(invalid("directory.url", "directory URL must not be empty"));
        }
        if !self.directory.url.starts_with("ldap://") && !self.directory.url.starts_with("ldaps://")
        {
            return Err(invalid(
                "directory.url",
                "directory URL must start with ldap:// or ldaps://",
            ));
        }
        if self.directory.base_dn.is_empty() {
            return Err(invalid("directory.base_dn", "base DN must not be empty"));
        }
        if let Some(ref sid) = self.directory.domain_sid {
            sid.parse::<ObjectSid>()
                .map_err(|e| invalid("directory.domain_sid", &e))?;
        }
        if self.daemon.poll_interval_secs == 0 {
            return Err(invalid("daemon.poll_interval_secs", "poll interval must be > 0"));
        }
        if self.sync_to_local.enabled && self.sync_to_local.service_account.is_empty() {
            return Err(invalid(
                "sync_to_local.service_account",
                "service account is required when the pass is enabled",
            ));
        }
        if self.sync_to_directory.enabled && self.sync_to_directory.service_account.is_empty() {
            return Err(invalid(
                "sync_to_directory.service_account",
                "service account is required when the pass is enabled",
            ));
        }
        for line in &self.roles.equivalences {
            RoleEquivalence::parse(line).ok_or_else(|| {
                invalid(
                    "roles.equivalences",
                    &format!("'{line}' is not in 'Group=role' form"),
                )
            })?;
        }

        let mut seen = HashSet::new();
        for entry in &self.attributes {
            if entry.directory_key.trim().is_empty() || entry.local_key.trim().is_empty() {
                return Err(invalid("attributes", "directory_key and local_key are required"));
            }
            if !seen.insert(entry.local_key.to_lowercase()) {
                return Err(invalid(
                    "attributes",
                    &format!("local_key '{}' is mapped more than once", entry.local_key),
                ));
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration provider
// ---------------------------------------------------------------------------

/// Keys the sync core asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    SyncToLocalEnabled,
    SyncToLocalServiceAccount,
    SyncToLocalServicePassword,
    SecurityGroups,
    ImportDisabledUsers,
    UseSamAccountNameForNewUsers,
    AutoUpdateDescription,
    AutoUpdatePassword,
    UpdateEmail,
    DefaultEmailDomain,
    DuplicateEmailPolicy,
    CleanExistingRoles,
    DefaultRole,
    AllowSmartcardUsers,
    ExecutionTimeLimit,
    AccountSuffix,
    DomainSid,
    SyncToDirectoryEnabled,
    SyncToDirectoryServiceAccount,
    SyncToDirectoryServicePassword,
    AttributeWhitelist,
    RoleEquivalences,
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Text(String),
    Integer(u64),
    List(Vec<String>),
    DuplicateEmailPolicy(DuplicateEmailPolicy),
    Attributes(Vec<AttributeWhitelistEntry>),
}

/// Source of option values, read on every call and never cached by callers.
pub trait ConfigurationProvider: Send + Sync {
    fn get_option_value(&self, key: OptionKey) -> OptionValue;

    fn get_bool(&self, key: OptionKey) -> bool {
        matches!(self.get_option_value(key), OptionValue::Bool(true))
    }

    /// Text value; anything that is not text reads as empty.
    fn get_string(&self, key: OptionKey) -> String {
        match self.get_option_value(key) {
            OptionValue::Text(s) => s,
            _ => String::new(),
        }
    }

    fn get_integer(&self, key: OptionKey) -> u64 {
        match self.get_option_value(key) {
            OptionValue::Integer(i) => i,
            _ => 0,
        }
    }

    fn get_list(&self, key: OptionKey) -> Vec<String> {
        match self.get_option_value(key) {
            OptionValue::List(items) => items,
            _ => Vec::new(),
        }
    }

    fn duplicate_email_policy(&self) -> DuplicateEmailPolicy {
        match self.get_option_value(OptionKey::DuplicateEmailPolicy) {
            OptionValue::DuplicateEmailPolicy(policy) => policy,
            _ => DuplicateEmailPolicy::default(),
        }
    }

    /// Snapshot of the whitelist for one pass.
    fn attribute_whitelist(&self) -> AttributeWhitelist {
        match self.get_option_value(OptionKey::AttributeWhitelist) {
            OptionValue::Attributes(entries) => AttributeWhitelist::new(entries),
            _ => AttributeWhitelist::default(),
        }
    }

    /// Equivalences in configured order; malformed lines are skipped.
    fn role_equivalences(&self) -> Vec<RoleEquivalence> {
        self.get_list(OptionKey::RoleEquivalences)
            .iter()
            .filter_map(|line| RoleEquivalence::parse(line))
            .collect()
    }
}

impl ConfigurationProvider for AppConfig {
    fn get_option_value(&self, key: OptionKey) -> OptionValue {
        let local = &self.sync_to_local;
        let opt_text = |v: &Option<String>| OptionValue::Text(v.clone().unwrap_or_default());
        match key {
            OptionKey::SyncToLocalEnabled => OptionValue::Bool(local.enabled),
            OptionKey::SyncToLocalServiceAccount => {
                OptionValue::Text(local.service_account.clone())
            }
            OptionKey::SyncToLocalServicePassword => opt_text(&local.service_password),
            OptionKey::SecurityGroups => OptionValue::List(local.security_groups.clone()),
            OptionKey::ImportDisabledUsers => OptionValue::Bool(local.import_disabled_users),
            OptionKey::UseSamAccountNameForNewUsers => {
                OptionValue::Bool(local.use_sam_account_name_for_new_users)
            }
            OptionKey::AutoUpdateDescription => OptionValue::Bool(local.auto_update_description),
            OptionKey::AutoUpdatePassword => OptionValue::Bool(local.auto_update_password),
            OptionKey::UpdateEmail => OptionValue::Bool(local.update_email),
            OptionKey::DefaultEmailDomain => opt_text(&local.default_email_domain),
            OptionKey::DuplicateEmailPolicy => {
                OptionValue::DuplicateEmailPolicy(local.duplicate_email_policy)
            }
            OptionKey::CleanExistingRoles => OptionValue::Bool(local.clean_existing_roles),
            OptionKey::DefaultRole => opt_text(&local.default_role),
            OptionKey::AllowSmartcardUsers => OptionValue::Bool(local.allow_smartcard_users),
            OptionKey::ExecutionTimeLimit => OptionValue::Integer(local.execution_time_limit_secs),
            OptionKey::AccountSuffix => OptionValue::Text(self.directory.account_suffix.clone()),
            OptionKey::DomainSid => opt_text(&self.directory.domain_sid),
            OptionKey::SyncToDirectoryEnabled => OptionValue::Bool(self.sync_to_directory.enabled),
            OptionKey::SyncToDirectoryServiceAccount => {
                OptionValue::Text(self.sync_to_directory.service_account.clone())
            }
            OptionKey::SyncToDirectoryServicePassword => {
                opt_text(&self.sync_to_directory.service_password)
            }
            OptionKey::AttributeWhitelist => OptionValue::Attributes(self.attributes.clone()),
            OptionKey::RoleEquivalences => OptionValue::List(self.roles.equivalences.clone()),
        }
    }
}

/// Shared, reloadable configuration.
///
/// Every option read takes the read lock for the duration of one lookup, so a
/// `reload()` between two runs is picked up by the next call.
pub struct ConfigStore {
    path: Option<PathBuf>,
    inner: RwLock<AppConfig>,
}

impl ConfigStore {
    /// Wrap an already-loaded configuration (no reload source).
    pub fn new(config: AppConfig) -> Self {
        Self {
            path: None,
            inner: RwLock::new(config),
        }
    }

    /// Load, resolve, and validate `path`; `reload()` re-reads the same file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = AppConfig::load_and_resolve(path.as_ref())?;
        Ok(Self {
            path: Some(path.as_ref().to_path_buf()),
            inner: RwLock::new(config),
        })
    }

    /// Re-read the backing file. The current values stay in place if the new
    /// file fails to load or validate.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(ref path) = self.path else {
            debug!("config store has no backing file, nothing to reload");
            return Ok(());
        };
        let config = AppConfig::load_and_resolve(path)?;
        *self.write() = config;
        info!(path = %path.display(), "configuration reloaded");
        Ok(())
    }

    /// Clone of the current configuration.
    pub fn snapshot(&self) -> AppConfig {
        self.read().clone()
    }

    /// Mutate the configuration in place.
    pub fn update<F: FnOnce(&mut AppConfig)>(&self, f: F) {
        f(&mut self.write());
    }

    fn read(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("config lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("config lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl ConfigurationProvider for ConfigStore {
    fn get_option_value(&self, key: OptionKey) -> OptionValue {
        self.read().get_option_value(key)
    }
}
