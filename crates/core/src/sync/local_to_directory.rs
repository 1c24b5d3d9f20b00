//! Local -> directory pass.
//!
//! Pushes whitelisted local attribute values back to the directory with the
//! write-capable service account. Only entries flagged `sync_to_directory`
//! with a writable type are considered, and only values that differ from the
//! directory's current value are sent, in one modify per account.

use std::collections::BTreeMap;

use tracing::{debug, error, info, info_span, warn};

use super::hooks::{HostEnvironment, UnlimitedHost};
use super::journal::{NullJournal, RunJournal};
use super::stats::{RecordOutcome, SyncRunStats};
use super::{bind_service_account, RunLock, ServiceAccountKeys};
use crate::attributes::AttributeWhitelistEntry;
use crate::config::{ConfigurationProvider, OptionKey};
use crate::directory::{requested_attributes, DirectoryClient};
use crate::errors::SyncError;
use crate::models::{AccountId, DirectoryUser, DirectoryValue, LocalAccount, SyncDirection};
use crate::store::{meta, LocalAccountStore};

const KEYS: ServiceAccountKeys = ServiceAccountKeys {
    enabled: OptionKey::SyncToDirectoryEnabled,
    account: OptionKey::SyncToDirectoryServiceAccount,
    password: OptionKey::SyncToDirectoryServicePassword,
    label: "sync_to_directory",
};

static UNLIMITED_HOST: UnlimitedHost = UnlimitedHost;
static NULL_JOURNAL: NullJournal = NullJournal;

pub struct LocalToDirectorySync<'a> {
    directory: &'a mut dyn DirectoryClient,
    store: &'a dyn LocalAccountStore,
    config: &'a dyn ConfigurationProvider,
    host: &'a dyn HostEnvironment,
    journal: &'a dyn RunJournal,
    lock: Option<RunLock>,
}

impl<'a> LocalToDirectorySync<'a> {
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

    pub fn with_lock(mut self, lock: RunLock) -> Self {
        self.lock = Some(lock);
        self
    }

    fn prepare_connection(&mut self) -> Result<(), SyncError> {
        bind_service_account(self.directory, self.config, &KEYS)?;
        let budget = self.config.get_integer(OptionKey::ExecutionTimeLimit);
        if budget > 0 && !self.host.request_execution_time(budget) {
            warn!(secs = budget, "host refused a larger execution time budget");
        }
        Ok(())
    }

    fn writable_entries(&self) -> Vec<AttributeWhitelistEntry> {
        self.config
            .attribute_whitelist()
            .writable_entries()
            .cloned()
            .collect()
    }

    /// Run one full local -> directory pass.
    pub fn synchronize(&mut self) -> Result<SyncRunStats, SyncError> {
        let _guard = self.lock.as_ref().map(RunLock::try_acquire).transpose()?;
        let mut stats = SyncRunStats::new(SyncDirection::LocalToDirectory);
        let span = info_span!("sync_run", run_id = %stats.run_id, direction = %stats.direction);
        let _entered = span.enter();
        info!("starting local -> directory synchronization");

        if let Err(e) = self.prepare_connection() {
            if !matches!(e, SyncError::Disabled(_)) {
                error!(error = %e, "local -> directory synchronization aborted");
                stats.finish();
                if let Err(je) = self.journal.complete_run(None, &stats, Some(&e.to_string())) {
                    warn!(error = %je, "failed to record sync run");
                }
            }
            return Err(e);
        }

        let run_id = self
            .journal
            .start_run(SyncDirection::LocalToDirectory)
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to record sync run start");
                None
            });

        let entries = self.writable_entries();
        let accounts = if entries.is_empty() {
            info!("no attributes are configured for write-back");
            Vec::new()
        } else {
            match self.store.known_directory_accounts() {
                Ok(accounts) => accounts,
                Err(e) => {
                    let e = SyncError::from(e);
                    error!(error = %e, "failed to enumerate local accounts");
                    self.directory.unbind();
                    stats.finish();
                    if let Err(je) = self.journal.complete_run(run_id, &stats, Some(&e.to_string())) {
                        warn!(error = %je, "failed to record sync run");
                    }
                    return Err(e);
                }
            }
        };
        info!(count = accounts.len(), "accounts to push");

        for known in accounts {
            let principal = known.sam_account_name.clone();
            match self.push_account(known.id, &principal, &entries) {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    let e = SyncError::record(&principal, e);
                    warn!(principal = %principal, error = %e, "record synchronization failed");
                    stats.record_failed();
                    if let Err(je) = self.journal.record_failure(
                        SyncDirection::LocalToDirectory,
                        &principal,
                        &e.to_string(),
                    ) {
                        warn!(error = %je, "failed to record sync failure");
                    }
                }
            }
        }

        self.directory.unbind();
        stats.finish();
        if let Err(e) = self.journal.complete_run(run_id, &stats, None) {
            warn!(error = %e, "failed to record sync run");
        }
        info!(
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            elapsed_ms = stats.elapsed_ms(),
            "local -> directory synchronization finished"
        );
        Ok(stats)
    }

    /// Push one account, e.g. after its profile was saved locally.
    ///
    /// Returns whether anything was written.
    pub fn synchronize_account(&mut self, id: AccountId) -> Result<bool, SyncError> {
        self.prepare_connection()?;
        let principal = self.store.get_meta(id, meta::SAM_ACCOUNT_NAME)?;
        let result = match principal {
            Some(principal) if !principal.is_empty() => {
                let entries = self.writable_entries();
                self.push_account(id, &principal, &entries)
                    .map_err(|e| SyncError::record(&principal, e))
            }
            _ => {
                debug!(id, "account is not linked to a directory account");
                Ok(RecordOutcome::Skipped)
            }
        };
        self.directory.unbind();
        Ok(result? == RecordOutcome::Updated)
    }

    fn push_account(
        &mut self,
        id: AccountId,
        principal: &str,
        entries: &[AttributeWhitelistEntry],
    ) -> Result<RecordOutcome, SyncError> {
        if self.store.get_meta(id, meta::USER_DISABLED)?.as_deref() == Some("1") {
            debug!(principal, "account disabled locally, not pushing");
            return Ok(RecordOutcome::Skipped);
        }
        let Some(account) = self.store.find_by_id(id)? else {
            return Ok(RecordOutcome::Skipped);
        };

        let attributes =
            requested_attributes(entries.iter().map(|e| e.directory_key.as_str()));
        let Some(current) = self.directory.find_user_attributes(principal, &attributes)? else {
            warn!(principal, "account not found in the directory, not pushing");
            return Ok(RecordOutcome::Skipped);
        };

        let changes = pending_changes(&account, &current, entries);
        if changes.is_empty() {
            debug!(principal, "directory already up to date");
            return Ok(RecordOutcome::Skipped);
        }

        self.directory.modify_user(principal, &changes)?;
        info!(
            principal,
            attributes = ?changes.keys().collect::<Vec<_>>(),
            "pushed local attributes to directory"
        );
        Ok(RecordOutcome::Updated)
    }
}

/// Directory attribute -> new values, for every writable entry whose local
/// value differs from the directory's current value.
fn pending_changes(
    account: &LocalAccount,
    current: &DirectoryUser,
    entries: &[AttributeWhitelistEntry],
) -> BTreeMap<String, Vec<String>> {
    let mut changes = BTreeMap::new();
    for entry in entries {
        let Some(value) = account.raw_attributes.get(&entry.local_key) else {
            continue;
        };
        if value.is_empty() && !entry.overwrite_with_empty {
            continue;
        }
        let wanted = value.to_directory_values();
        let existing: Vec<String> = match current.attributes.get(&entry.directory_key.to_lowercase())
        {
            Some(DirectoryValue::Text(values)) => values.clone(),
            _ => Vec::new(),
        };
        if wanted != existing {
            changes.insert(entry.directory_key.clone(), wanted);
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeType, AttributeWhitelist};
    use crate::config::AppConfig;
    use crate::db::Database;
    use crate::directory::memory::InMemoryDirectory;
    use crate::models::{LocalValue, RawAttributes};

    fn entry(dir: &str, ty: AttributeType, local: &str) -> AttributeWhitelistEntry {
        let mut entry = AttributeWhitelistEntry::new(dir, ty, local);
        entry.sync_to_directory = true;
        entry
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sync_to_directory.enabled = true;
        config.sync_to_directory.service_account = "svc-write".into();
        config.sync_to_directory.service_password = Some("pw".into());
        config.attributes = vec![
            entry("telephoneNumber", AttributeType::String, "phone"),
            entry("otherTelephone", AttributeType::List, "other_phones"),
            entry("whenCreated", AttributeType::Time, "created"),
        ];
        config
    }

    fn directory_user(sam: &str, phone: &str) -> DirectoryUser {
        let mut attrs = RawAttributes::new();
        attrs.insert("samaccountname".into(), DirectoryValue::text(sam));
        attrs.insert("telephonenumber".into(), DirectoryValue::text(phone));
        DirectoryUser::new(attrs)
    }

    fn linked_account(db: &Database, sam: &str, attrs: &[(&str, LocalValue)]) -> AccountId {
        let mut account = LocalAccount::new(sam);
        for (key, value) in attrs {
            account.raw_attributes.insert(key.to_string(), value.clone());
        }
        let id = db.create(&account, "", false).unwrap();
        account.assign_id(id).unwrap();
        db.update(&account).unwrap();
        db.update_meta(id, meta::SAM_ACCOUNT_NAME, sam).unwrap();
        id
    }

    #[test]
    fn test_pending_changes_only_differences() {
        let entries = vec![
            entry("telephoneNumber", AttributeType::String, "phone"),
            entry("otherTelephone", AttributeType::List, "other_phones"),
        ];
        let mut account = LocalAccount::new("jdoe");
        account
            .raw_attributes
            .insert("phone".into(), LocalValue::Text("555-0100".into()));
        account.raw_attributes.insert(
            "other_phones".into(),
            LocalValue::List(vec!["555-0101".into(), "555-0102".into()]),
        );

        let changes = pending_changes(&account, &directory_user("jdoe", "555-0100"), &entries);
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes["otherTelephone"],
            vec!["555-0101".to_string(), "555-0102".to_string()]
        );
    }

    #[test]
    fn test_empty_values_need_overwrite_flag() {
        let mut clear = entry("telephoneNumber", AttributeType::String, "phone");
        let mut account = LocalAccount::new("jdoe");
        account
            .raw_attributes
            .insert("phone".into(), LocalValue::Text(String::new()));
        let current = directory_user("jdoe", "555-0100");

        assert!(pending_changes(&account, &current, std::slice::from_ref(&clear)).is_empty());
        clear.overwrite_with_empty = true;
        let changes = pending_changes(&account, &current, std::slice::from_ref(&clear));
        assert_eq!(changes["telephoneNumber"], Vec::<String>::new());
    }

    #[test]
    fn test_attributes_absent_in_directory_are_not_written_back() {
        let entries = vec![
            entry("employeeNumber", AttributeType::Integer, "employee_number"),
            entry("msExchHideFromAddressLists", AttributeType::Bool, "hidden"),
        ];
        let current = directory_user("jdoe", "555-0100");

        let mut account = LocalAccount::new("jdoe");
        account.raw_attributes = AttributeWhitelist::new(entries.clone()).map(&current.attributes);
        assert!(account.raw_attributes.is_empty());
        assert!(pending_changes(&account, &current, &entries).is_empty());

        let db = store();
        let mut config = config();
        config.attributes = entries;
        let mut directory = InMemoryDirectory::new();
        directory.add_credentials("svc-write", "pw");
        directory.add_user(current);
        linked_account(&db, "jdoe", &[]);

        let stats = LocalToDirectorySync::new(&mut directory, &db, &config)
            .synchronize()
            .unwrap();
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.skipped, 1);
        assert!(directory.modifications().is_empty());
    }

    #[test]
    fn test_batch_pushes_and_skips() {
        let db = store();
        let config = config();
        let mut directory = InMemoryDirectory::new();
        directory.add_credentials("svc-write", "pw");
        directory.add_user(directory_user("jdoe", "555-0100"));
        directory.add_user(directory_user("asmith", "555-0200"));

        linked_account(&db, "jdoe", &[("phone", LocalValue::Text("555-0199".into()))]);
        linked_account(&db, "asmith", &[("phone", LocalValue::Text("555-0200".into()))]);
        let disabled = linked_account(&db, "gone", &[("phone", LocalValue::Text("1".into()))]);
        db.update_meta(disabled, meta::USER_DISABLED, "1").unwrap();

        let stats = LocalToDirectorySync::new(&mut directory, &db, &config)
            .with_journal(&db)
            .synchronize()
            .unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(directory.modifications().len(), 1);
        assert_eq!(directory.modifications()[0].0, "jdoe");
        assert_eq!(
            directory.user("jdoe").unwrap().text("telephoneNumber"),
            Some("555-0199")
        );
    }

    #[test]
    fn test_failures_are_isolated() {
        let db = store();
        let config = config();
        let mut directory = InMemoryDirectory::new();
        directory.add_credentials("svc-write", "pw");
        directory.add_user(directory_user("jdoe", "555-0100"));
        directory.add_user(directory_user("broken", "555-0300"));
        directory.fail_principal("broken");

        linked_account(&db, "broken", &[("phone", LocalValue::Text("555-0399".into()))]);
        linked_account(&db, "jdoe", &[("phone", LocalValue::Text("555-0199".into()))]);

        let stats = LocalToDirectorySync::new(&mut directory, &db, &config)
            .with_journal(&db)
            .synchronize()
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.updated, 1);
        let failures = db
            .list_audit_log(Some(crate::sync::journal::RECORD_FAILED_ACTION), 10)
            .unwrap();
        assert_eq!(failures[0].principal.as_deref(), Some("broken"));
    }

    #[test]
    fn test_disabled_pass_and_single_account() {
        let db = store();
        let mut config = config();
        let mut directory = InMemoryDirectory::new();
        directory.add_credentials("svc-write", "pw");
        directory.add_user(directory_user("jdoe", "555-0100"));
        let id = linked_account(&db, "jdoe", &[("phone", LocalValue::Text("555-0199".into()))]);

        assert!(LocalToDirectorySync::new(&mut directory, &db, &config)
            .synchronize_account(id)
            .unwrap());
        assert!(!LocalToDirectorySync::new(&mut directory, &db, &config)
            .synchronize_account(id)
            .unwrap());

        config.sync_to_directory.enabled = false;
        let err = LocalToDirectorySync::new(&mut directory, &db, &config)
            .synchronize()
            .unwrap_err();
        assert!(matches!(err, SyncError::Disabled(_)));
    }

    fn store() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }
}
