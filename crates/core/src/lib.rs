//! adsync core library.
//!
//! Reconciles user identity, attributes, roles and enabled state between an
//! Active Directory (over LDAP) and a local account store: configuration,
//! SQLite persistence, the directory client, identity resolution, attribute
//! mapping, account lifecycle, role mapping and the two batch orchestrators.

pub mod attributes;
pub mod config;
pub mod db;
pub mod directory;
pub mod errors;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod roles;
pub mod store;
pub mod sync;

// Re-exports for convenience.
pub use config::{AppConfig, ConfigStore, ConfigurationProvider};
pub use db::Database;
pub use directory::ldap::LdapDirectoryClient;
pub use directory::memory::InMemoryDirectory;
pub use directory::DirectoryClient;
pub use identity::IdentityResolver;
pub use lifecycle::AccountLifecycle;
pub use roles::RoleMapper;
pub use store::LocalAccountStore;
pub use sync::{DirectoryToLocalSync, LocalToDirectorySync, SyncContext, SyncRunStats};
