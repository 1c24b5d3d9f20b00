//! The local account store seen by the sync core.
//!
//! [`LocalAccountStore`] is the seam between the sync logic and persistence;
//! [`Database`] implements it on top of SQLite.

use crate::db::Database;
use crate::errors::DatabaseError;
use crate::models::{AccountId, LocalAccount};

/// Meta keys written by the sync core.
pub mod meta {
    pub const OBJECT_GUID: &str = "adsync_objectguid";
    pub const SAM_ACCOUNT_NAME: &str = "adsync_samaccountname";
    pub const USER_PRINCIPAL_NAME: &str = "adsync_userprincipalname";
    pub const DOMAIN_SID: &str = "adsync_domainsid";
    pub const USER_DISABLED: &str = "adsync_user_disabled";
    pub const USER_DISABLED_REASON: &str = "adsync_user_disabled_reason";
    pub const USER_DISABLED_EMAIL: &str = "adsync_user_disabled_email";
    pub const LAST_SYNCHRONIZED: &str = "adsync_last_synchronized";
}

/// An account that was synchronized from the directory before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownDirectoryAccount {
    pub id: AccountId,
    pub sam_account_name: String,
    pub object_guid: Option<String>,
}

/// CRUD over local accounts, their meta values and roles.
///
/// Lookups return `Ok(None)` when nothing matches.
pub trait LocalAccountStore: Send + Sync {
    fn find_by_id(&self, id: AccountId) -> Result<Option<LocalAccount>, DatabaseError>;
    fn find_by_object_guid(&self, guid: &str) -> Result<Option<LocalAccount>, DatabaseError>;
    fn find_by_sam_account_name(&self, name: &str) -> Result<Option<LocalAccount>, DatabaseError>;
    fn find_by_login_name(&self, login_name: &str) -> Result<Option<LocalAccount>, DatabaseError>;
    fn find_by_email(&self, email: &str) -> Result<Option<LocalAccount>, DatabaseError>;

    /// Persist a new account. `allow_duplicate_email` suppresses the email
    /// uniqueness check for this one write.
    fn create(
        &self,
        account: &LocalAccount,
        email: &str,
        allow_duplicate_email: bool,
    ) -> Result<AccountId, DatabaseError>;

    /// Write profile fields and attributes of a persisted account.
    fn update(&self, account: &LocalAccount) -> Result<(), DatabaseError>;

    fn update_email(
        &self,
        id: AccountId,
        email: &str,
        allow_duplicate_email: bool,
    ) -> Result<(), DatabaseError>;

    /// Replace the password; the store keeps only a hash.
    fn update_password(&self, id: AccountId, password: &str) -> Result<(), DatabaseError>;

    fn get_meta(&self, id: AccountId, key: &str) -> Result<Option<String>, DatabaseError>;
    fn update_meta(&self, id: AccountId, key: &str, value: &str) -> Result<(), DatabaseError>;
    fn delete_meta(&self, id: AccountId, key: &str) -> Result<(), DatabaseError>;

    /// Id of the account using `email`, if any.
    fn email_owner(&self, email: &str) -> Result<Option<AccountId>, DatabaseError>;

    fn is_email_existing(&self, email: &str) -> Result<bool, DatabaseError> {
        Ok(self.email_owner(email)?.is_some())
    }

    fn get_roles(&self, id: AccountId) -> Result<Vec<String>, DatabaseError>;
    fn set_roles(&self, id: AccountId, roles: &[String]) -> Result<(), DatabaseError>;

    /// Accounts linked to a directory account name.
    fn known_directory_accounts(&self) -> Result<Vec<KnownDirectoryAccount>, DatabaseError>;
}

impl LocalAccountStore for Database {
    fn find_by_id(&self, id: AccountId) -> Result<Option<LocalAccount>, DatabaseError> {
        self.get_account(id)
    }

    fn find_by_object_guid(&self, guid: &str) -> Result<Option<LocalAccount>, DatabaseError> {
        self.get_account_by_meta(meta::OBJECT_GUID, guid)
    }

    fn find_by_sam_account_name(&self, name: &str) -> Result<Option<LocalAccount>, DatabaseError> {
        self.get_account_by_meta(meta::SAM_ACCOUNT_NAME, name)
    }

    fn find_by_login_name(&self, login_name: &str) -> Result<Option<LocalAccount>, DatabaseError> {
        if login_name.is_empty() {
            return Ok(None);
        }
        self.get_account_by_login(login_name)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<LocalAccount>, DatabaseError> {
        self.get_account_by_email(email)
    }

    fn create(
        &self,
        account: &LocalAccount,
        email: &str,
        allow_duplicate_email: bool,
    ) -> Result<AccountId, DatabaseError> {
        self.insert_account(account, email, allow_duplicate_email)
    }

    fn update(&self, account: &LocalAccount) -> Result<(), DatabaseError> {
        self.update_account(account)
    }

    fn update_email(
        &self,
        id: AccountId,
        email: &str,
        allow_duplicate_email: bool,
    ) -> Result<(), DatabaseError> {
        self.set_account_email(id, email, allow_duplicate_email)
    }

    fn update_password(&self, id: AccountId, password: &str) -> Result<(), DatabaseError> {
        self.set_account_password(id, password)
    }

    fn get_meta(&self, id: AccountId, key: &str) -> Result<Option<String>, DatabaseError> {
        Database::get_meta(self, id, key)
    }

    fn update_meta(&self, id: AccountId, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.set_meta(id, key, value)
    }

    fn delete_meta(&self, id: AccountId, key: &str) -> Result<(), DatabaseError> {
        Database::delete_meta(self, id, key)
    }

    fn email_owner(&self, email: &str) -> Result<Option<AccountId>, DatabaseError> {
        self.get_email_owner(email)
    }

    fn get_roles(&self, id: AccountId) -> Result<Vec<String>, DatabaseError> {
        Database::get_roles(self, id)
    }

    fn set_roles(&self, id: AccountId, roles: &[String]) -> Result<(), DatabaseError> {
        Database::set_roles(self, id, roles)
    }

    fn known_directory_accounts(&self) -> Result<Vec<KnownDirectoryAccount>, DatabaseError> {
        self.list_accounts_with_meta(meta::SAM_ACCOUNT_NAME)?
            .into_iter()
            .map(|linked| {
                let object_guid = Database::get_meta(self, linked.id, meta::OBJECT_GUID)?
                    .filter(|g| !g.is_empty());
                Ok(KnownDirectoryAccount {
                    id: linked.id,
                    sam_account_name: linked.meta_value,
                    object_guid,
                })
            })
            .collect()
    }
}
