//! Directory -> local pass.
//!
//! `PrepareConnection -> EnumerateDirectoryUsers -> PerRecordSync(xN) -> Finish`
//!
//! A failure while preparing the connection or enumerating users aborts the
//! run before any account is touched. A failure inside one record is logged
//! with the principal, counted in `failed`, and the loop moves on.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, error, info, info_span, warn};

use super::context::SyncContext;
use super::hooks::{HostEnvironment, SyncCandidate, SyncHooks, UnlimitedHost};
use super::journal::{NullJournal, RunJournal};
use super::stats::{RecordOutcome, SyncRunStats};
use super::{bind_service_account, RunLock, ServiceAccountKeys};
use crate::attributes::AttributeWhitelist;
use crate::config::{ConfigurationProvider, OptionKey};
use crate::directory::{attr, requested_attributes, DirectoryClient};
use crate::errors::{AccountError, SyncError};
use crate::identity::IdentityResolver;
use crate::lifecycle::account::REASON_DIRECTORY_DISABLED;
use crate::lifecycle::{AccountLifecycle, ChangeNotifier};
use crate::models::{DirectoryUser, LocalAccount, LocalValue, SyncDirection};
use crate::store::{KnownDirectoryAccount, LocalAccountStore};

const KEYS: ServiceAccountKeys = ServiceAccountKeys {
    enabled: OptionKey::SyncToLocalEnabled,
    account: OptionKey::SyncToLocalServiceAccount,
    password: OptionKey::SyncToLocalServicePassword,
    label: "sync_to_local",
};

static UNLIMITED_HOST: UnlimitedHost = UnlimitedHost;
static NULL_JOURNAL: NullJournal = NullJournal;

pub struct DirectoryToLocalSync<'a> {
    directory: &'a mut dyn DirectoryClient,
    store: &'a dyn LocalAccountStore,
    config: &'a dyn ConfigurationProvider,
    host: &'a dyn HostEnvironment,
    journal: &'a dyn RunJournal,
    notifier: Option<&'a dyn ChangeNotifier>,
    hooks: SyncHooks,
    lock: Option<RunLock>,
}

impl<'a> DirectoryToLocalSync<'a> {
    pub fn new(
        directory: &'a mut dyn DirectoryClient,
        store: &'a dyn LocalAccountStore,
        config: &'a dyn ConfigurationProvider,
    ) -> Self {
        Self {
            directory,
            store,
            config,
            host: &UNLIMITED_HOST,
            journal: &NULL_JOURNAL,
            notifier: None,
            hooks: SyncHooks::default(),
            lock: None,
        }
    }

    pub fn with_host(mut self, host: &'a dyn HostEnvironment) -> Self {
        self.host = host;
        self
    }

    pub fn with_journal(mut self, journal: &'a dyn RunJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_notifier(mut self, notifier: &'a dyn ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_hooks(mut self, hooks: SyncHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_lock(mut self, lock: RunLock) -> Self {
        self.lock = Some(lock);
        self
    }

    fn lifecycle(&self) -> AccountLifecycle<'a> {
        let lifecycle = AccountLifecycle::new(self.store, self.config);
        match self.notifier {
            Some(notifier) => lifecycle.with_notifier(notifier),
            None => lifecycle,
        }
    }

    // -----------------------------------------------------------------------
    // Batch pass
    // -----------------------------------------------------------------------

    /// Run one full directory -> local pass.
    ///
    /// Errors only when the run could not start: the pass is disabled,
    /// another run holds the lock, the service account cannot bind, the
    /// domain does not match, or enumeration fails.
    pub fn synchronize(&mut self) -> Result<SyncRunStats, SyncError> {
        let _guard = self.lock.as_ref().map(RunLock::try_acquire).transpose()?;
        let mut stats = SyncRunStats::new(SyncDirection::DirectoryToLocal);
        let span = info_span!("sync_run", run_id = %stats.run_id, direction = %stats.direction);
        let _entered = span.enter();
        info!("starting directory -> local synchronization");

        if let Err(e) = self.prepare_connection() {
            if !matches!(e, SyncError::Disabled(_)) {
                error!(error = %e, "directory -> local synchronization aborted");
                self.finish_journal(None, &mut stats, Some(&e));
            }
            return Err(e);
        }

        let run_id = self
            .journal
            .start_run(SyncDirection::DirectoryToLocal)
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to record sync run start");
                None
            });

        let whitelist = self.config.attribute_whitelist();
        let attributes = requested_attributes(whitelist.directory_keys());

        let candidates = match self.enumerate(&attributes) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "failed to enumerate directory users");
                self.directory.unbind();
                self.finish_journal(run_id, &mut stats, Some(&e));
                return Err(e);
            }
        };
        info!(count = candidates.len(), "users to synchronize");

        let ctx = SyncContext::new();
        for candidate in candidates {
            let principal = candidate.principal().to_string();
            match self.sync_candidate(&ctx, candidate, &whitelist, &attributes) {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    let e = SyncError::record(&principal, e);
                    warn!(principal = %principal, error = %e, "record synchronization failed");
                    stats.record_failed();
                    if let Err(je) = self.journal.record_failure(
                        SyncDirection::DirectoryToLocal,
                        &principal,
                        &e.to_string(),
                    ) {
                        warn!(error = %je, "failed to record sync failure");
                    }
                }
            }
        }

        self.directory.unbind();
        self.finish_journal(run_id, &mut stats, None);
        info!(
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            elapsed_ms = stats.elapsed_ms(),
            "directory -> local synchronization finished"
        );
        Ok(stats)
    }

    fn finish_journal(&self, run_id: Option<i64>, stats: &mut SyncRunStats, err: Option<&SyncError>) {
        stats.finish();
        let err = err.map(ToString::to_string);
        if let Err(e) = self.journal.complete_run(run_id, stats, err.as_deref()) {
            warn!(error = %e, "failed to record sync run");
        }
    }

    /// Bind the service account, check its domain and ask the host for time.
    fn prepare_connection(&mut self) -> Result<(), SyncError> {
        let account = bind_service_account(self.directory, self.config, &KEYS)?;
        if let Err(e) = self.verify_domain(&account) {
            self.directory.unbind();
            return Err(e);
        }

        let budget = self.config.get_integer(OptionKey::ExecutionTimeLimit);
        if budget > 0 && !self.host.request_execution_time(budget) {
            warn!(secs = budget, "host refused a larger execution time budget");
        }
        Ok(())
    }

    /// Compare the service account's domain SID with the configured one.
    fn verify_domain(&mut self, account: &str) -> Result<(), SyncError> {
        let configured = self.config.get_string(OptionKey::DomainSid);
        let configured = configured.trim();
        if configured.is_empty() {
            debug!("no domain SID configured, skipping domain check");
            return Ok(());
        }

        let found = self
            .directory
            .find_user_attributes(account, &[attr::OBJECT_SID.to_string()])
            .map_err(SyncError::DirectoryUnavailable)?;
        let actual = found
            .and_then(|user| user.identity.object_sid)
            .map(|sid| sid.domain_sid().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if !actual.eq_ignore_ascii_case(configured) {
            error!(configured, actual = %actual, "service account belongs to another domain");
            return Err(SyncError::DomainMismatch {
                configured: configured.to_string(),
                actual,
            });
        }
        debug!(domain_sid = configured, "domain SID verified");
        Ok(())
    }

    /// Security group members plus every previously synchronized account
    /// that was not among them.
    fn enumerate(&mut self, attributes: &[String]) -> Result<Vec<SyncCandidate>, SyncError> {
        let groups = self.config.get_list(OptionKey::SecurityGroups);
        let users = if groups.is_empty() {
            warn!("no security groups configured");
            Vec::new()
        } else {
            self.directory.find_users_in_groups(&groups, attributes)?
        };

        let mut names = HashSet::new();
        let mut guids = HashSet::new();
        let mut candidates = Vec::with_capacity(users.len());
        for user in users {
            let name = user.identity.principal().to_lowercase();
            let guid = user.identity.object_guid.clone();
            if !names.insert(name) || (!guid.is_empty() && !guids.insert(guid)) {
                continue;
            }
            candidates.push(SyncCandidate::Directory(user));
        }

        let enumerated = candidates.len();
        for known in self.store.known_directory_accounts()? {
            let by_name = names.contains(&known.sam_account_name.to_lowercase());
            let by_guid = known
                .object_guid
                .as_ref()
                .is_some_and(|g| guids.contains(g));
            if !by_name && !by_guid {
                candidates.push(SyncCandidate::LocalOnly(known));
            }
        }
        debug!(
            enumerated,
            local_only = candidates.len() - enumerated,
            "merged directory users with known local accounts"
        );

        Ok(self.hooks.filter(candidates))
    }

    fn sync_candidate(
        &mut self,
        ctx: &SyncContext,
        candidate: SyncCandidate,
        whitelist: &AttributeWhitelist,
        attributes: &[String],
    ) -> Result<RecordOutcome, SyncError> {
        match candidate {
            SyncCandidate::Directory(user) => self.sync_directory_user(ctx, &user, whitelist),
            SyncCandidate::LocalOnly(known) => self.recheck_local_account(&known, attributes),
        }
    }

    fn sync_directory_user(
        &self,
        ctx: &SyncContext,
        user: &DirectoryUser,
        whitelist: &AttributeWhitelist,
    ) -> Result<RecordOutcome, SyncError> {
        let lifecycle = self.lifecycle();
        let principal = user.identity.principal();
        let existing = IdentityResolver::new(self.store).resolve(&user.identity)?;
        let existing_id = existing.as_ref().and_then(|a| a.id);

        if let Some(reason) = lifecycle.restriction_reason(Some(user)) {
            if let Some(id) = existing_id {
                lifecycle.disable(id, reason)?;
            }
            debug!(principal, reason, "skipping restricted user");
            return Ok(RecordOutcome::Skipped);
        }

        if user.identity.user_account_control.is_disabled()
            && !self.config.get_bool(OptionKey::ImportDisabledUsers)
        {
            if let Some(id) = existing_id {
                lifecycle.disable(id, REASON_DIRECTORY_DISABLED)?;
            }
            debug!(principal, "skipping user disabled in the directory");
            return Ok(RecordOutcome::Skipped);
        }

        let mapped = whitelist.map(&user.attributes);
        let (account, outcome) = self.create_or_update(ctx, &lifecycle, user, existing, mapped)?;
        lifecycle.synchronize_account_status(&account, user)?;
        Ok(outcome)
    }

    /// An account that was synchronized before but is no longer in any
    /// security group: look it up again and apply the restriction checks.
    fn recheck_local_account(
        &mut self,
        known: &KnownDirectoryAccount,
        attributes: &[String],
    ) -> Result<RecordOutcome, SyncError> {
        let lifecycle = self.lifecycle();
        let Some(account) = self.store.find_by_id(known.id)? else {
            return Ok(RecordOutcome::Skipped);
        };

        let found = match &known.object_guid {
            Some(guid) => self.directory.find_user_by_guid(guid, attributes)?,
            None => self
                .directory
                .find_user_attributes(&known.sam_account_name, attributes)?,
        };

        if !lifecycle.check_account_restrictions(&account, found.as_ref())? {
            info!(login = %account.login_name, "local-only account restricted");
            return Ok(RecordOutcome::Skipped);
        }
        if let Some(user) = &found {
            lifecycle.synchronize_account_status(&account, user)?;
        }
        Ok(RecordOutcome::Skipped)
    }

    fn create_or_update(
        &self,
        ctx: &SyncContext,
        lifecycle: &AccountLifecycle<'a>,
        user: &DirectoryUser,
        existing: Option<LocalAccount>,
        attributes: BTreeMap<String, LocalValue>,
    ) -> Result<(LocalAccount, RecordOutcome), SyncError> {
        match existing {
            Some(mut account) => {
                lifecycle.update(ctx, &mut account, user, attributes)?;
                info!(login = %account.login_name, "updated account from directory");
                Ok((account, RecordOutcome::Updated))
            }
            None => {
                let (mut account, allow_duplicate) =
                    lifecycle.prepare_new_account(user, attributes)?;
                if let Some(hook) = &self.hooks.before_create {
                    hook(user, &mut account);
                }
                let account = lifecycle.persist_new(ctx, user, account, allow_duplicate)?;
                if let Some(hook) = &self.hooks.after_create {
                    hook(user, &account);
                }
                Ok((account, RecordOutcome::Created))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Single user
    // -----------------------------------------------------------------------

    /// Create or update exactly one account after a successful directory
    /// login. Sets `ctx.authorized` on success.
    ///
    /// Unlike the batch pass every failure is returned, including duplicate
    /// email conflicts and restrictions.
    pub fn synchronize_single_user(
        &self,
        ctx: &mut SyncContext,
        user: &DirectoryUser,
        password: Option<&str>,
    ) -> Result<LocalAccount, SyncError> {
        let principal = user.identity.principal();
        ctx.authorized = false;
        if !ctx.authenticated {
            return Err(AccountError::InvalidAccountState {
                login_name: principal.to_string(),
                detail: "user is not authenticated".into(),
            }
            .into());
        }

        let lifecycle = self.lifecycle();
        let existing = IdentityResolver::new(self.store).resolve(&user.identity)?;

        let disabled_in_directory = user.identity.user_account_control.is_disabled()
            && !self.config.get_bool(OptionKey::ImportDisabledUsers);
        let restriction = lifecycle
            .restriction_reason(Some(user))
            .or(disabled_in_directory.then_some(REASON_DIRECTORY_DISABLED));
        if let Some(reason) = restriction {
            if let Some(id) = existing.as_ref().and_then(|a| a.id) {
                lifecycle.disable(id, reason)?;
            }
            warn!(principal, reason, "login refused");
            return Err(AccountError::Restricted {
                login_name: principal.to_string(),
                reason: reason.to_string(),
            }
            .into());
        }

        let mapped = self.config.attribute_whitelist().map(&user.attributes);
        let (account, outcome) = self.create_or_update(ctx, &lifecycle, user, existing, mapped)?;

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            if self.config.get_bool(OptionKey::AutoUpdatePassword) {
                lifecycle.update_password(ctx, &account, password)?;
            }
        }
        lifecycle.synchronize_account_status(&account, user)?;

        ctx.authorized = true;
        info!(principal, login = %account.login_name, ?outcome, "single user synchronized");
        Ok(account)
    }

    /// Look `principal` up with the service account and synchronize it as
    /// an administrative action.
    pub fn synchronize_principal(&mut self, principal: &str) -> Result<LocalAccount, SyncError> {
        self.prepare_connection()?;
        let attributes = requested_attributes(self.config.attribute_whitelist().directory_keys());
        let found = self.directory.find_user_attributes(principal, &attributes);
        self.directory.unbind();

        let user = found?.ok_or_else(|| SyncError::record(principal, "not found in the directory"))?;
        let mut ctx = SyncContext::authenticated();
        self.synchronize_single_user(&mut ctx, &user, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::Database;
    use crate::directory::memory::InMemoryDirectory;
    use crate::lifecycle::UserAccountControl;
    use crate::models::{DirectoryValue, RawAttributes};
    use crate::store::meta;

    fn store() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sync_to_local.enabled = true;
        config.sync_to_local.service_account = "svc-sync".into();
        config.sync_to_local.service_password = Some("pw".into());
        config.sync_to_local.security_groups = vec!["Staff".into()];
        config
    }

    fn user(sam: &str, guid: &str, uac: u32) -> DirectoryUser {
        let mut attrs = RawAttributes::new();
        attrs.insert("samaccountname".into(), DirectoryValue::text(sam));
        attrs.insert(
            "userprincipalname".into(),
            DirectoryValue::text(format!("{sam}@corp.example.com")),
        );
        attrs.insert("objectguid".into(), DirectoryValue::text(guid));
        attrs.insert("useraccountcontrol".into(), DirectoryValue::text(uac.to_string()));
        attrs.insert(
            "memberof".into(),
            DirectoryValue::text("CN=Staff,OU=Groups,DC=corp,DC=example,DC=com"),
        );
        DirectoryUser::new(attrs)
    }

    fn directory() -> InMemoryDirectory {
        let mut directory = InMemoryDirectory::new();
        directory.add_credentials("svc-sync", "pw");
        directory
    }

    #[test]
    fn test_disabled_pass_touches_nothing() {
        let db = store();
        let mut config = config();
        config.sync_to_local.enabled = false;
        let mut directory = directory();
        let err = DirectoryToLocalSync::new(&mut directory, &db, &config)
            .synchronize()
            .unwrap_err();
        assert!(matches!(err, SyncError::Disabled(_)));
        assert!(directory.bound_as().is_none());
    }

    #[test]
    fn test_bind_failure_aborts_run() {
        let db = store();
        let mut config = config();
        config.sync_to_local.service_password = Some("wrong".into());
        let mut directory = directory();
        directory.add_user(user("jdoe", "guid-1", UserAccountControl::NORMAL));
        let err = DirectoryToLocalSync::new(&mut directory, &db, &config)
            .with_journal(&db)
            .synchronize()
            .unwrap_err();
        assert!(matches!(err, SyncError::DirectoryUnavailable(_)));
        assert_eq!(db.count_accounts().unwrap(), 0);
        assert_eq!(db.count_failures().unwrap(), 1);
    }

    #[test]
    fn test_domain_mismatch_aborts_run() {
        let db = store();
        let mut config = config();
        config.directory.domain_sid = Some("S-1-5-21-1-2-3".into());
        let mut directory = directory();
        let mut svc = RawAttributes::new();
        svc.insert("samaccountname".into(), DirectoryValue::text("svc-sync"));
        svc.insert("objectsid".into(), DirectoryValue::text("S-1-5-21-9-9-9-1105"));
        directory.add_user(DirectoryUser::new(svc));
        directory.add_user(user("jdoe", "guid-1", UserAccountControl::NORMAL));

        let err = DirectoryToLocalSync::new(&mut directory, &db, &config)
            .synchronize()
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::DomainMismatch { ref actual, .. } if actual == "S-1-5-21-9-9-9"
        ));
        assert_eq!(db.count_accounts().unwrap(), 0);
    }

    #[test]
    fn test_hooks_filter_and_observe_creation() {
        use std::sync::{Arc, Mutex};

        let db = store();
        let config = config();
        let mut directory = directory();
        directory.add_user(user("jdoe", "guid-1", UserAccountControl::NORMAL));
        directory.add_user(user("skipme", "guid-2", UserAccountControl::NORMAL));

        let created = Arc::new(Mutex::new(Vec::new()));
        let seen = created.clone();
        let hooks = SyncHooks::default()
            .with_user_filter(|candidates| {
                candidates
                    .into_iter()
                    .filter(|c| c.principal() != "skipme")
                    .collect()
            })
            .with_before_create(|_, account| account.description = "imported".into())
            .with_after_create(move |_, account| {
                seen.lock().unwrap().push(account.login_name.clone())
            });

        let stats = DirectoryToLocalSync::new(&mut directory, &db, &config)
            .with_hooks(hooks)
            .synchronize()
            .unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(*created.lock().unwrap(), vec!["jdoe@corp.example.com"]);
        let account = db.find_by_login_name("jdoe@corp.example.com").unwrap().unwrap();
        assert_eq!(account.description, "imported");
    }

    #[test]
    fn test_second_run_updates() {
        let db = store();
        let config = config();
        let mut directory = directory();
        directory.add_user(user("jdoe", "guid-1", UserAccountControl::NORMAL));

        let first = DirectoryToLocalSync::new(&mut directory, &db, &config)
            .synchronize()
            .unwrap();
        assert_eq!(first.created, 1);
        let second = DirectoryToLocalSync::new(&mut directory, &db, &config)
            .synchronize()
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(db.count_accounts().unwrap(), 1);
    }

    #[test]
    fn test_single_user_requires_authentication() {
        let db = store();
        let config = config();
        let mut directory = directory();
        let sync = DirectoryToLocalSync::new(&mut directory, &db, &config);
        let mut ctx = SyncContext::new();
        let err = sync
            .synchronize_single_user(&mut ctx, &user("jdoe", "guid-1", UserAccountControl::NORMAL), None)
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Account(AccountError::InvalidAccountState { .. })
        ));
        assert!(!ctx.authorized);
    }

    #[test]
    fn test_single_user_writes_password_and_authorizes() {
        let db = store();
        let mut config = config();
        config.sync_to_local.auto_update_password = true;
        let mut directory = directory();
        let sync = DirectoryToLocalSync::new(&mut directory, &db, &config);

        let mut ctx = SyncContext::authenticated();
        let account = sync
            .synchronize_single_user(
                &mut ctx,
                &user("jdoe", "guid-1", UserAccountControl::NORMAL),
                Some("Secret1!"),
            )
            .unwrap();
        assert!(ctx.authorized);
        let id = account.id.unwrap();
        assert!(db.verify_account_password(id, "Secret1!").unwrap());
        assert_eq!(
            Database::get_meta(&db, id, meta::OBJECT_GUID).unwrap().as_deref(),
            Some("guid-1")
        );
    }

    #[test]
    fn test_single_user_restricted() {
        let db = store();
        let config = config();
        let mut directory = directory();
        let sync = DirectoryToLocalSync::new(&mut directory, &db, &config);
        let mut ctx = SyncContext::authenticated();
        let err = sync
            .synchronize_single_user(
                &mut ctx,
                &user(
                    "jdoe",
                    "guid-1",
                    UserAccountControl::NORMAL | UserAccountControl::SMARTCARD_REQUIRED,
                ),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::Account(AccountError::Restricted { .. })));
        assert!(!ctx.authorized);
        assert_eq!(db.count_accounts().unwrap(), 0);
    }

    #[test]
    fn test_synchronize_principal() {
        let db = store();
        let config = config();
        let mut directory = directory();
        directory.add_user(user("jdoe", "guid-1", UserAccountControl::NORMAL));
        let mut sync = DirectoryToLocalSync::new(&mut directory, &db, &config);

        let account = sync.synchronize_principal("CORP\\jdoe").unwrap();
        assert_eq!(account.login_name, "jdoe@corp.example.com");
        assert!(matches!(
            sync.synchronize_principal("nobody"),
            Err(SyncError::RecordSyncFailure { .. })
        ));
    }
}
