//! Per-request state passed explicitly through the sync core.

use std::cell::Cell;

/// State of one request or batch run.
///
/// The login path sets `authenticated` after a successful directory bind and
/// reads `authorized` once the single-user sync has finished.
#[derive(Debug, Default)]
pub struct SyncContext {
    pub authenticated: bool,
    pub authorized: bool,
    suppressed: Cell<u32>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a user that just bound successfully against the directory.
    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            ..Self::default()
        }
    }

    /// Suppress change notifications until the returned guard is dropped.
    /// Guards nest.
    pub fn suppress_notifications(&self) -> NotificationGuard<'_> {
        self.suppressed.set(self.suppressed.get() + 1);
        NotificationGuard { ctx: self }
    }

    pub fn notifications_suppressed(&self) -> bool {
        self.suppressed.get() > 0
    }
}

/// Re-enables notifications on drop.
#[must_use = "notifications are re-enabled as soon as the guard is dropped"]
pub struct NotificationGuard<'a> {
    ctx: &'a SyncContext,
}

impl Drop for NotificationGuard<'_> {
    fn drop(&mut self) {
        let depth = self.ctx.suppressed.get();
        self.ctx.suppressed.set(depth.saturating_sub(1));
    }
}
