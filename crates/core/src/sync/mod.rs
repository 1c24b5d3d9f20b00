//! The two batch orchestrators and the single-user path.
//!
//! Each pass follows the same shape:
//!
//! 1. Prepare the directory connection (abort the whole run on failure)
//! 2. Enumerate the records to look at
//! 3. Synchronize every record on its own; a failure is counted and logged
//! 4. Emit [`SyncRunStats`]

pub mod context;
pub mod directory_to_local;
pub mod hooks;
pub mod journal;
pub mod local_to_directory;
pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::{ConfigurationProvider, OptionKey};
use crate::directory::DirectoryClient;
use crate::errors::SyncError;

pub use context::SyncContext;
pub use directory_to_local::DirectoryToLocalSync;
pub use hooks::{HostEnvironment, SyncCandidate, SyncHooks, UnlimitedHost};
pub use journal::{NullJournal, RunJournal};
pub use local_to_directory::LocalToDirectorySync;
pub use stats::{RecordOutcome, SyncRunStats};

// ---------------------------------------------------------------------------
// Run lock
// ---------------------------------------------------------------------------

/// Prevents two runs in the same direction from overlapping.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    running: Arc<AtomicBool>,
    started_at: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Take the lock or fail with `AlreadyRunning`.
    pub fn try_acquire(&self) -> Result<RunLockGuard, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let started_at = self
                .started_at
                .lock()
                .map(|s| s.as_ref().map(|t| t.to_rfc3339()))
                .unwrap_or_default()
                .unwrap_or_else(|| "unknown".into());
            return Err(SyncError::AlreadyRunning { started_at });
        }
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Utc::now());
        }
        Ok(RunLockGuard(self.running.clone()))
    }
}

/// Drop guard that releases the [`RunLock`], even if the pass panics.
pub struct RunLockGuard(Arc<AtomicBool>);

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Connection preparation
// ---------------------------------------------------------------------------

/// Options naming the service account of one direction.
pub(crate) struct ServiceAccountKeys {
    pub enabled: OptionKey,
    pub account: OptionKey,
    pub password: OptionKey,
    pub label: &'static str,
}

/// Check that the pass is enabled and bind the service account.
pub(crate) fn bind_service_account(
    directory: &mut dyn DirectoryClient,
    config: &dyn ConfigurationProvider,
    keys: &ServiceAccountKeys,
) -> Result<String, SyncError> {
    if !config.get_bool(keys.enabled) {
        info!(pass = keys.label, "synchronization disabled, nothing to do");
        return Err(SyncError::Disabled(keys.label.to_string()));
    }
    let account = config.get_string(keys.account);
    let password = config.get_string(keys.password);
    directory.bind(&account, &password).map_err(|e| {
        error!(pass = keys.label, account = %account, error = %e, "service account bind failed");
        SyncError::DirectoryUnavailable(e)
    })?;
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lock_is_exclusive_and_released_on_drop() {
        let lock = RunLock::new();
        {
            let _guard = lock.try_acquire().unwrap();
            assert!(lock.is_running());
            assert!(matches!(
                lock.try_acquire(),
                Err(SyncError::AlreadyRunning { .. })
            ));
        }
        assert!(!lock.is_running());
        assert!(lock.try_acquire().is_ok());
    }
}
