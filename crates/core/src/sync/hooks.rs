//! Host-supplied callbacks for the orchestrators.

use tracing::debug;

use crate::models::{DirectoryUser, LocalAccount};
use crate::store::KnownDirectoryAccount;

/// The environment a pass runs in.
pub trait HostEnvironment: Send + Sync {
    /// Ask for at least `secs` seconds of execution time before a long pass.
    /// Returns whether the request was granted.
    fn request_execution_time(&self, secs: u64) -> bool;
}

/// A host without an execution limit.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedHost;

impl HostEnvironment for UnlimitedHost {
    fn request_execution_time(&self, secs: u64) -> bool {
        debug!(secs, "execution time requested, host has no limit");
        true
    }
}

/// One entry of the directory -> local work list.
#[derive(Debug, Clone)]
pub enum SyncCandidate {
    /// A member of a configured security group.
    Directory(DirectoryUser),
    /// A previously synchronized account that was not enumerated this time.
    LocalOnly(KnownDirectoryAccount),
}

impl SyncCandidate {
    pub fn principal(&self) -> &str {
        match self {
            Self::Directory(user) => user.identity.principal(),
            Self::LocalOnly(known) => &known.sam_account_name,
        }
    }
}

pub type UserFilter = Box<dyn Fn(Vec<SyncCandidate>) -> Vec<SyncCandidate> + Send + Sync>;
pub type BeforeCreate = Box<dyn Fn(&DirectoryUser, &mut LocalAccount) + Send + Sync>;
pub type AfterCreate = Box<dyn Fn(&DirectoryUser, &LocalAccount) + Send + Sync>;

/// Optional callbacks; every hook defaults to "do nothing".
#[derive(Default)]
pub struct SyncHooks {
    /// May shrink the work list before records are processed.
    pub user_filter: Option<UserFilter>,
    /// Runs on the prepared account right before it is persisted.
    pub before_create: Option<BeforeCreate>,
    pub after_create: Option<AfterCreate>,
}

impl SyncHooks {
    pub fn with_user_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(Vec<SyncCandidate>) -> Vec<SyncCandidate> + Send + Sync + 'static,
    {
        self.user_filter = Some(Box::new(filter));
        self
    }

    pub fn with_before_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DirectoryUser, &mut LocalAccount) + Send + Sync + 'static,
    {
        self.before_create = Some(Box::new(hook));
        self
    }

    pub fn with_after_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DirectoryUser, &LocalAccount) + Send + Sync + 'static,
    {
        self.after_create = Some(Box::new(hook));
        self
    }

    pub(crate) fn filter(&self, candidates: Vec<SyncCandidate>) -> Vec<SyncCandidate> {
        match &self.user_filter {
            Some(filter) => {
                let before = candidates.len();
                let kept = filter(candidates);
                debug!(before, after = kept.len(), "user filter applied");
                kept
            }
            None => candidates,
        }
    }
}

impl std::fmt::Debug for SyncHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHooks")
            .field("user_filter", &self.user_filter.is_some())
            .field("before_create", &self.before_create.is_some())
            .field("after_create", &self.after_create.is_some())
            .finish()
    }
}
