//! Create, update, enable and disable local accounts.
//!
//! Account states:
//!
//! ```text
//! Unresolved --resolve miss--> New --create--> Existing-Enabled
//!                                                  |   ^
//!                                          disable |   | enable
//!                                                  v   |
//!                                            Existing-Disabled
//! ```
//!
//! `create` persists first and then runs the same field, meta and role
//! updates as `update`. The description of a new account is taken from the
//! directory once; later passes only touch it with auto-update enabled.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::email::{get_email, resolve_email_conflict};
use crate::config::{ConfigurationProvider, OptionKey};
use crate::directory::attr;
use crate::errors::{AccountError, DatabaseError};
use crate::models::{AccountId, DirectoryUser, LocalAccount, LocalValue};
use crate::roles::RoleMapper;
use crate::store::{meta, LocalAccountStore};
use crate::sync::context::SyncContext;

/// Appended to the stored email of a disabled account.
pub const QUARANTINE_SUFFIX: &str = "-DISABLED";

pub const REASON_NOT_FOUND: &str = "User no longer found in Active Directory";
pub const REASON_NOT_NORMAL: &str = "User is not a normal account";
pub const REASON_SMARTCARD: &str = "User requires a smart card";
pub const REASON_DIRECTORY_DISABLED: &str = "User is disabled in Active Directory";

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Receives password and email change events for local accounts.
pub trait ChangeNotifier: Send + Sync {
    fn email_changed(&self, account: &LocalAccount, old_email: &str, new_email: &str);
    fn password_changed(&self, account: &LocalAccount);
}

/// Writes change events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl ChangeNotifier for LoggingNotifier {
    fn email_changed(&self, account: &LocalAccount, old_email: &str, new_email: &str) {
        info!(login = %account.login_name, old_email, new_email, "email changed");
    }

    fn password_changed(&self, account: &LocalAccount) {
        info!(login = %account.login_name, "password changed");
    }
}

static LOGGING_NOTIFIER: LoggingNotifier = LoggingNotifier;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

pub struct AccountLifecycle<'a> {
    store: &'a dyn LocalAccountStore,
    config: &'a dyn ConfigurationProvider,
    notifier: &'a dyn ChangeNotifier,
}

impl<'a> AccountLifecycle<'a> {
    pub fn new(store: &'a dyn LocalAccountStore, config: &'a dyn ConfigurationProvider) -> Self {
        Self {
            store,
            config,
            notifier: &LOGGING_NOTIFIER,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn ChangeNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn roles(&self) -> RoleMapper<'a> {
        RoleMapper::new(self.store, self.config)
    }

    /// Login name for a new account: the userPrincipalName, or the
    /// sAMAccountName when configured (or when there is no UPN).
    pub fn login_name_for(&self, user: &DirectoryUser) -> String {
        let identity = &user.identity;
        if self.config.get_bool(OptionKey::UseSamAccountNameForNewUsers)
            || identity.user_principal_name.is_empty()
        {
            identity.sam_account_name.clone()
        } else {
            identity.user_principal_name.clone()
        }
    }

    /// Build an unsaved account for `user` with its email already resolved.
    pub fn prepare_new_account(
        &self,
        user: &DirectoryUser,
        attributes: BTreeMap<String, LocalValue>,
    ) -> Result<(LocalAccount, bool), AccountError> {
        let login_name = self.login_name_for(user);
        if login_name.is_empty() {
            return Err(AccountError::InvalidAccountState {
                login_name: user.identity.principal().to_string(),
                detail: "directory user has no account name".into(),
            });
        }

        let mut account = LocalAccount::new(login_name);
        apply_profile(&mut account, user, true);
        account.raw_attributes = attributes;
        account.role_assignment = self.roles().role_assignment(user);

        let preferred = get_email(
            user,
            &account.login_name,
            &self.config.get_string(OptionKey::DefaultEmailDomain),
        );
        let resolution = resolve_email_conflict(
            self.store,
            self.config.duplicate_email_policy(),
            None,
            "",
            &preferred,
        )?;
        account.email = resolution.email;
        Ok((account, resolution.allow_duplicate))
    }

    /// Persist a new account, then run the regular update on it.
    pub fn create(
        &self,
        ctx: &SyncContext,
        user: &DirectoryUser,
        attributes: BTreeMap<String, LocalValue>,
    ) -> Result<LocalAccount, AccountError> {
        let (account, allow_duplicate) = self.prepare_new_account(user, attributes)?;
        self.persist_new(ctx, user, account, allow_duplicate)
    }

    /// Second half of [`create`](Self::create), split out so callers can
    /// inspect or adjust the prepared account first.
    pub fn persist_new(
        &self,
        ctx: &SyncContext,
        user: &DirectoryUser,
        mut account: LocalAccount,
        allow_duplicate_email: bool,
    ) -> Result<LocalAccount, AccountError> {
        if account.id.is_some() {
            return Err(AccountError::InvalidAccountState {
                login_name: account.login_name,
                detail: "create called on a persisted account".into(),
            });
        }
        let email = account.email.clone();
        let id = self.store.create(&account, &email, allow_duplicate_email)?;
        account.assign_id(id)?;
        info!(id, login = %account.login_name, email = %email, "created local account");

        self.apply_update(ctx, &mut account, user, true)?;
        Ok(account)
    }

    /// Update an existing account from a directory user.
    pub fn update(
        &self,
        ctx: &SyncContext,
        account: &mut LocalAccount,
        user: &DirectoryUser,
        attributes: BTreeMap<String, LocalValue>,
    ) -> Result<(), AccountError> {
        account.require_id()?;
        for (key, value) in attributes {
            account.raw_attributes.insert(key, value);
        }
        account.role_assignment = self.roles().role_assignment(user);
        self.apply_update(ctx, account, user, false)
    }

    fn apply_update(
        &self,
        ctx: &SyncContext,
        account: &mut LocalAccount,
        user: &DirectoryUser,
        is_new_account: bool,
    ) -> Result<(), AccountError> {
        let id = account.require_id()?;
        let _quiet = ctx.suppress_notifications();

        apply_profile(
            account,
            user,
            self.config.get_bool(OptionKey::AutoUpdateDescription),
        );
        self.store.update(account)?;

        let identity = &user.identity;
        self.store
            .update_meta(id, meta::SAM_ACCOUNT_NAME, &identity.sam_account_name)?;
        if !identity.user_principal_name.is_empty() {
            self.store
                .update_meta(id, meta::USER_PRINCIPAL_NAME, &identity.user_principal_name)?;
        }

        if !is_new_account && self.config.get_bool(OptionKey::UpdateEmail) {
            self.update_email(ctx, account, user)?;
        }

        let assignment = account.role_assignment.clone();
        self.roles()
            .synchronize_roles(account, &assignment, is_new_account)?;

        if !identity.object_guid.is_empty() {
            self.store.update_meta(id, meta::OBJECT_GUID, &identity.object_guid)?;
        }
        if let Some(sid) = &identity.object_sid {
            self.store
                .update_meta(id, meta::DOMAIN_SID, &sid.domain_sid().to_string())?;
        }
        self.store
            .update_meta(id, meta::LAST_SYNCHRONIZED, &Utc::now().to_rfc3339())?;

        debug!(id, login = %account.login_name, "updated local account");
        Ok(())
    }

    fn update_email(
        &self,
        ctx: &SyncContext,
        account: &mut LocalAccount,
        user: &DirectoryUser,
    ) -> Result<(), AccountError> {
        let id = account.require_id()?;
        // A quarantined address is restored by `enable`, not here.
        if self.is_disabled(id)? {
            return Ok(());
        }
        let preferred = get_email(
            user,
            &account.login_name,
            &self.config.get_string(OptionKey::DefaultEmailDomain),
        );
        if preferred.is_empty() || preferred.eq_ignore_ascii_case(&account.email) {
            return Ok(());
        }

        let resolution = resolve_email_conflict(
            self.store,
            self.config.duplicate_email_policy(),
            Some(id),
            &account.email,
            &preferred,
        )?;
        if resolution.email.eq_ignore_ascii_case(&account.email) {
            return Ok(());
        }
        self.store
            .update_email(id, &resolution.email, resolution.allow_duplicate)?;

        let old = std::mem::replace(&mut account.email, resolution.email);
        if !ctx.notifications_suppressed() {
            self.notifier.email_changed(account, &old, &account.email);
        }
        Ok(())
    }

    /// Overwrite the stored password hash.
    pub fn update_password(
        &self,
        ctx: &SyncContext,
        account: &LocalAccount,
        password: &str,
    ) -> Result<(), AccountError> {
        let id = account.require_id()?;
        self.store.update_password(id, password)?;
        debug!(id, login = %account.login_name, "password updated");
        if !ctx.notifications_suppressed() {
            self.notifier.password_changed(account);
        }
        Ok(())
    }

    pub fn is_disabled(&self, id: AccountId) -> Result<bool, AccountError> {
        Ok(self.store.get_meta(id, meta::USER_DISABLED)?.as_deref() == Some("1"))
    }

    /// Flag the account disabled and quarantine its email.
    ///
    /// Returns `false` when the account was already disabled, in which case
    /// nothing is written.
    pub fn disable(&self, id: AccountId, reason: &str) -> Result<bool, AccountError> {
        if self.is_disabled(id)? {
            debug!(id, "account already disabled");
            return Ok(false);
        }
        let account = self.load(id)?;

        self.store.update_meta(id, meta::USER_DISABLED, "1")?;
        self.store.update_meta(id, meta::USER_DISABLED_REASON, reason)?;

        if !account.email.is_empty() && !account.email.ends_with(QUARANTINE_SUFFIX) {
            self.store
                .update_meta(id, meta::USER_DISABLED_EMAIL, &account.email)?;
            let quarantined = format!("{}{}", account.email, QUARANTINE_SUFFIX);
            self.store.update_email(id, &quarantined, true)?;
        }

        info!(id, login = %account.login_name, reason, "disabled local account");
        Ok(true)
    }

    /// Clear the disabled flag and restore the quarantined email.
    ///
    /// The saved address goes through the duplicate email policy, since
    /// another account may have taken it meanwhile. Under `Prevent` a taken
    /// address fails and the account stays disabled.
    ///
    /// Returns `false` when the account was not disabled.
    pub fn enable(&self, id: AccountId) -> Result<bool, AccountError> {
        if !self.is_disabled(id)? {
            return Ok(false);
        }
        let account = self.load(id)?;

        if account.email.ends_with(QUARANTINE_SUFFIX) {
            match self.store.get_meta(id, meta::USER_DISABLED_EMAIL)? {
                Some(original) if !original.is_empty() => {
                    let resolution = resolve_email_conflict(
                        self.store,
                        self.config.duplicate_email_policy(),
                        Some(id),
                        "",
                        &original,
                    )?;
                    if resolution.allow_duplicate {
                        warn!(id, email = %resolution.email, "restored email is shared with another account");
                    } else if resolution.email != original {
                        warn!(id, saved = %original, email = %resolution.email, "saved email was taken, restored a variant");
                    }
                    self.store
                        .update_email(id, &resolution.email, resolution.allow_duplicate)?;
                }
                _ => warn!(id, "no saved email to restore, keeping quarantined address"),
            }
        }
        self.store.delete_meta(id, meta::USER_DISABLED)?;
        self.store.delete_meta(id, meta::USER_DISABLED_REASON)?;
        self.store.delete_meta(id, meta::USER_DISABLED_EMAIL)?;

        info!(id, login = %account.login_name, "enabled local account");
        Ok(true)
    }

    /// Disable or enable `account` according to the directory disabled bit.
    pub fn synchronize_account_status(
        &self,
        account: &LocalAccount,
        user: &DirectoryUser,
    ) -> Result<(), AccountError> {
        let id = account.require_id()?;
        if user.identity.user_account_control.is_disabled() {
            self.disable(id, REASON_DIRECTORY_DISABLED)?;
        } else {
            self.enable(id)?;
        }
        Ok(())
    }

    /// Why `user` may not use a local account, if anything.
    ///
    /// `None` for `user` means the directory record could not be found.
    pub fn restriction_reason(&self, user: Option<&DirectoryUser>) -> Option<&'static str> {
        let Some(user) = user else {
            return Some(REASON_NOT_FOUND);
        };
        let flags = user.identity.user_account_control.interpret();
        if !flags.is_normal_account {
            return Some(REASON_NOT_NORMAL);
        }
        if flags.is_smartcard_required && !self.config.get_bool(OptionKey::AllowSmartcardUsers) {
            return Some(REASON_SMARTCARD);
        }
        None
    }

    /// Returns `true` when the account may proceed. A restricted account that
    /// is already persisted gets disabled with the reason.
    pub fn check_account_restrictions(
        &self,
        account: &LocalAccount,
        user: Option<&DirectoryUser>,
    ) -> Result<bool, AccountError> {
        let Some(reason) = self.restriction_reason(user) else {
            return Ok(true);
        };
        debug!(login = %account.login_name, reason, "account restricted");
        if let Some(id) = account.id {
            self.disable(id, reason)?;
        }
        Ok(false)
    }

    fn load(&self, id: AccountId) -> Result<LocalAccount, AccountError> {
        self.store.find_by_id(id)?.ok_or_else(|| {
            AccountError::Store(DatabaseError::NotFound {
                entity: "account".into(),
                id: id.to_string(),
            })
        })
    }
}

/// Copy profile fields from the directory. First and last name always
/// follow the directory; the description only when `with_description`.
fn apply_profile(account: &mut LocalAccount, user: &DirectoryUser, with_description: bool) {
    account.first_name = user.text(attr::GIVEN_NAME).unwrap_or_default().to_string();
    account.last_name = user.text(attr::SURNAME).unwrap_or_default().to_string();
    if let Some(display_name) = user.text(attr::DISPLAY_NAME) {
        account.display_name = display_name.to_string();
    } else if account.display_name.is_empty() {
        account.display_name = format!("{} {}", account.first_name, account.last_name)
            .trim()
            .to_string();
    }
    if with_description {
        account.description = user.text(attr::DESCRIPTION).unwrap_or_default().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, DuplicateEmailPolicy};
    use crate::db::Database;
    use crate::lifecycle::account_control::UserAccountControl;
    use crate::models::{DirectoryValue, RawAttributes};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<String>>,
    }

    impl ChangeNotifier for RecordingNotifier {
        fn email_changed(&self, _account: &LocalAccount, old: &str, new: &str) {
            self.events.lock().unwrap().push(format!("email {old} -> {new}"));
        }
        fn password_changed(&self, account: &LocalAccount) {
            self.events
                .lock()
                .unwrap()
                .push(format!("password {}", account.login_name));
        }
    }

    fn store() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sync_to_local.update_email = true;
        config.roles.equivalences = vec!["Authors=author".into()];
        config
    }

    fn user(pairs: &[(&str, &str)]) -> DirectoryUser {
        let attrs: RawAttributes = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), DirectoryValue::text(*v)))
            .collect();
        DirectoryUser::new(attrs)
    }

    fn jdoe(uac: u32) -> DirectoryUser {
        user(&[
            ("objectguid", "guid-1"),
            ("samaccountname", "jdoe"),
            ("userprincipalname", "jdoe@corp.example.com"),
            ("mail", "jdoe@corp.example.com"),
            ("givenname", "John"),
            ("sn", "Doe"),
            ("description", "Engineer"),
            ("memberof", "CN=Authors,OU=Groups,DC=corp,DC=example,DC=com"),
            ("useraccountcontrol", &uac.to_string()),
        ])
    }

    #[test]
    fn test_create_persists_then_updates() {
        let db = store();
        let config = config();
        let lifecycle = AccountLifecycle::new(&db, &config);
        let ctx = SyncContext::new();

        let account = lifecycle
            .create(&ctx, &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap();
        let id = account.id.unwrap();
        assert_eq!(account.login_name, "jdoe@corp.example.com");
        assert_eq!(account.email, "jdoe@corp.example.com");
        assert_eq!(account.first_name, "John");
        assert_eq!(account.description, "Engineer");
        assert_eq!(db.get_roles(id).unwrap(), vec!["author"]);
        assert_eq!(
            Database::get_meta(&db, id, meta::OBJECT_GUID).unwrap().as_deref(),
            Some("guid-1")
        );
        assert_eq!(
            Database::get_meta(&db, id, meta::SAM_ACCOUNT_NAME).unwrap().as_deref(),
            Some("jdoe")
        );
    }

    #[test]
    fn test_create_with_sam_account_name_login() {
        let db = store();
        let mut config = config();
        config.sync_to_local.use_sam_account_name_for_new_users = true;
        let lifecycle = AccountLifecycle::new(&db, &config);
        let account = lifecycle
            .create(&SyncContext::new(), &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap();
        assert_eq!(account.login_name, "jdoe");
    }

    #[test]
    fn test_create_prevented_by_duplicate_email() {
        let db = store();
        db.create(&LocalAccount::new("other"), "jdoe@corp.example.com", false)
            .unwrap();
        let config = config();
        let lifecycle = AccountLifecycle::new(&db, &config);
        let err = lifecycle
            .create(&SyncContext::new(), &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, AccountError::DuplicateEmailConflict { .. }));
        assert!(db.find_by_login_name("jdoe@corp.example.com").unwrap().is_none());
    }

    #[test]
    fn test_update_requires_persisted_account() {
        let db = store();
        let config = config();
        let lifecycle = AccountLifecycle::new(&db, &config);
        let mut account = LocalAccount::new("jdoe");
        let err = lifecycle
            .update(
                &SyncContext::new(),
                &mut account,
                &jdoe(UserAccountControl::NORMAL),
                BTreeMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidAccountState { .. }));
    }

    #[test]
    fn test_update_description_only_when_enabled() {
        let db = store();
        let config = config();
        let lifecycle = AccountLifecycle::new(&db, &config);
        let ctx = SyncContext::new();
        let mut account = lifecycle
            .create(&ctx, &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap();

        let changed = user(&[
            ("samaccountname", "jdoe"),
            ("userprincipalname", "jdoe@corp.example.com"),
            ("givenname", "Johnny"),
            ("sn", "Doe"),
            ("description", "Manager"),
        ]);
        lifecycle.update(&ctx, &mut account, &changed, BTreeMap::new()).unwrap();
        let stored = db.find_by_id(account.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.first_name, "Johnny");
        assert_eq!(stored.description, "Engineer");
    }

    #[test]
    fn test_email_update_notifications_are_suppressed_during_update() {
        let db = store();
        let config = config();
        let notifier = RecordingNotifier::default();
        let lifecycle = AccountLifecycle::new(&db, &config).with_notifier(&notifier);
        let ctx = SyncContext::new();
        let mut account = lifecycle
            .create(&ctx, &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap();

        let moved = user(&[
            ("samaccountname", "jdoe"),
            ("userprincipalname", "jdoe@corp.example.com"),
            ("mail", "john.doe@corp.example.com"),
        ]);
        lifecycle.update(&ctx, &mut account, &moved, BTreeMap::new()).unwrap();
        assert_eq!(account.email, "john.doe@corp.example.com");
        assert!(notifier.events.lock().unwrap().is_empty());

        lifecycle.update_password(&ctx, &account, "s3cret").unwrap();
        assert_eq!(*notifier.events.lock().unwrap(), vec!["password jdoe@corp.example.com"]);
        assert!(db.verify_account_password(account.id.unwrap(), "s3cret").unwrap());
    }

    #[test]
    fn test_disable_is_idempotent_and_enable_restores_email() {
        let db = store();
        let config = config();
        let lifecycle = AccountLifecycle::new(&db, &config);
        let account = lifecycle
            .create(&SyncContext::new(), &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap();
        let id = account.id.unwrap();

        assert!(lifecycle.disable(id, "test").unwrap());
        let first = db.find_by_id(id).unwrap().unwrap().email;
        assert_eq!(first, "jdoe@corp.example.com-DISABLED");

        assert!(!lifecycle.disable(id, "again").unwrap());
        assert_eq!(db.find_by_id(id).unwrap().unwrap().email, first);
        assert_eq!(
            Database::get_meta(&db, id, meta::USER_DISABLED_REASON).unwrap().as_deref(),
            Some("test")
        );

        assert!(lifecycle.enable(id).unwrap());
        assert_eq!(db.find_by_id(id).unwrap().unwrap().email, "jdoe@corp.example.com");
        assert!(!lifecycle.is_disabled(id).unwrap());
        assert!(!lifecycle.enable(id).unwrap());
    }

    #[test]
    fn test_enable_applies_duplicate_policy_to_restored_email() {
        let db = store();
        let mut config = config();
        let account = AccountLifecycle::new(&db, &config)
            .create(&SyncContext::new(), &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap();
        let id = account.id.unwrap();
        assert!(AccountLifecycle::new(&db, &config).disable(id, "test").unwrap());

        // someone else took the address while the account was disabled
        db.create(&LocalAccount::new("other"), "jdoe@corp.example.com", false)
            .unwrap();

        let err = AccountLifecycle::new(&db, &config).enable(id).unwrap_err();
        assert!(matches!(err, AccountError::DuplicateEmailConflict { .. }));
        assert!(AccountLifecycle::new(&db, &config).is_disabled(id).unwrap());
        assert_eq!(
            db.find_by_id(id).unwrap().unwrap().email,
            "jdoe@corp.example.com-DISABLED"
        );

        config.sync_to_local.duplicate_email_policy = DuplicateEmailPolicy::Create;
        let lifecycle = AccountLifecycle::new(&db, &config);
        assert!(lifecycle.enable(id).unwrap());
        assert!(!lifecycle.is_disabled(id).unwrap());
        assert_eq!(db.find_by_id(id).unwrap().unwrap().email, "jdoe0@corp.example.com");
    }

    #[test]
    fn test_disable_without_email() {
        let db = store();
        let config = config();
        let lifecycle = AccountLifecycle::new(&db, &config);
        let id = db.create(&LocalAccount::new("noemail"), "", false).unwrap();
        assert!(lifecycle.disable(id, "test").unwrap());
        assert_eq!(db.find_by_id(id).unwrap().unwrap().email, "");
        assert!(lifecycle.is_disabled(id).unwrap());
    }

    #[test]
    fn test_restrictions() {
        let db = store();
        let mut config = config();
        let lifecycle = AccountLifecycle::new(&db, &config);
        let mut account = LocalAccount::new("jdoe");

        assert!(lifecycle
            .check_account_restrictions(&account, Some(&jdoe(UserAccountControl::NORMAL)))
            .unwrap());
        assert_eq!(
            lifecycle.restriction_reason(Some(&jdoe(
                UserAccountControl::NORMAL | UserAccountControl::SMARTCARD_REQUIRED
            ))),
            Some(REASON_SMARTCARD)
        );
        assert_eq!(
            lifecycle.restriction_reason(Some(&jdoe(UserAccountControl::WORKSTATION_TRUST))),
            Some(REASON_NOT_NORMAL)
        );

        let id = db.create(&account, "jdoe@corp.example.com", false).unwrap();
        account.assign_id(id).unwrap();
        assert!(!lifecycle.check_account_restrictions(&account, None).unwrap());
        assert!(lifecycle.is_disabled(id).unwrap());
        let reason = Database::get_meta(&db, id, meta::USER_DISABLED_REASON).unwrap().unwrap();
        assert!(reason.contains("no longer"));

        config.sync_to_local.allow_smartcard_users = true;
        let lifecycle = AccountLifecycle::new(&db, &config);
        assert_eq!(
            lifecycle.restriction_reason(Some(&jdoe(
                UserAccountControl::NORMAL | UserAccountControl::SMARTCARD_REQUIRED
            ))),
            None
        );
    }

    #[test]
    fn test_status_follows_directory_disabled_bit() {
        let db = store();
        let mut config = config();
        config.sync_to_local.duplicate_email_policy = DuplicateEmailPolicy::Allow;
        let lifecycle = AccountLifecycle::new(&db, &config);
        let account = lifecycle
            .create(&SyncContext::new(), &jdoe(UserAccountControl::NORMAL), BTreeMap::new())
            .unwrap();
        let id = account.id.unwrap();

        lifecycle
            .synchronize_account_status(
                &account,
                &jdoe(UserAccountControl::NORMAL | UserAccountControl::DISABLED),
            )
            .unwrap();
        assert!(lifecycle.is_disabled(id).unwrap());

        lifecycle
            .synchronize_account_status(&account, &jdoe(UserAccountControl::NORMAL))
            .unwrap();
        assert!(!lifecycle.is_disabled(id).unwrap());
    }
}
