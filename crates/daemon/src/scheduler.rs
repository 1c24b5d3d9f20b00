//! Scheduler that runs both synchronization passes on a configurable
//! interval.
//!
//! Each cycle runs on the blocking thread pool. A tick that fires while the
//! previous cycle is still running is skipped rather than queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn};

use adsync_core::config::{AppConfig, ConfigStore};
use adsync_core::db::Database;
use adsync_core::directory::DirectoryClient;
use adsync_core::errors::SyncError;
use adsync_core::sync::{RunLock, SyncRunStats};
use adsync_core::{DirectoryToLocalSync, LdapDirectoryClient, LocalToDirectorySync};

/// Opens a fresh directory client for one pass.
pub type Connector = Arc<dyn Fn(&AppConfig) -> Box<dyn DirectoryClient> + Send + Sync>;

/// The production connector: an LDAP client for `[directory]`.
pub fn ldap_connector() -> Connector {
    Arc::new(|config: &AppConfig| {
        Box::new(LdapDirectoryClient::new(&config.directory)) as Box<dyn DirectoryClient>
    })
}

/// Aggregate statistics across cycles.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub total_cycles: AtomicU64,
    pub skipped_ticks: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

/// Everything a cycle needs, cloned into the blocking task.
#[derive(Clone)]
struct CycleContext {
    config: Arc<ConfigStore>,
    db: Arc<Database>,
    connect: Connector,
    to_local: RunLock,
    to_directory: RunLock,
    stats: Arc<SchedulerStats>,
}

pub struct Scheduler {
    ctx: CycleContext,
    poll_interval: Duration,
    in_flight: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<ConfigStore>,
        db: Arc<Database>,
        connect: Connector,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ctx: CycleContext {
                config,
                db,
                connect,
                to_local: RunLock::new(),
                to_directory: RunLock::new(),
                stats: Arc::new(SchedulerStats::default()),
            },
            poll_interval,
            in_flight: None,
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.ctx.stats.clone()
    }

    /// Main scheduler loop. Returns after `shutdown` is notified and the
    /// cycle in progress, if any, has finished.
    pub async fn run(&mut self, shutdown: Arc<Notify>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        // The first tick fires immediately, so a cycle runs at startup.
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.maybe_start_cycle(),
                _ = shutdown.notified() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }

        if let Some(handle) = self.in_flight.take() {
            if !handle.is_finished() {
                info!("waiting for the running cycle to finish");
            }
            if let Err(e) = handle.await {
                error!(error = %e, "sync cycle task failed");
            }
        }
    }

    /// Start a cycle unless the previous one is still running.
    fn maybe_start_cycle(&mut self) {
        if self.in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            let skipped = self.ctx.stats.skipped_ticks.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(skipped, "skipping sync cycle: previous cycle still running");
            return;
        }

        let cycle = self.ctx.stats.total_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = self.ctx.clone();
        self.in_flight = Some(task::spawn_blocking(move || {
            run_cycle(cycle, &ctx);
        }));
    }
}

/// One cycle: reload the configuration, then directory -> local followed by
/// local -> directory. Returns `true` when neither pass aborted.
fn run_cycle(cycle: u64, ctx: &CycleContext) -> bool {
    let span = info_span!("cycle", cycle);
    let _entered = span.enter();

    if let Err(e) = ctx.config.reload() {
        warn!(error = %e, "configuration reload failed, keeping the current values");
    }
    let snapshot = ctx.config.snapshot();
    let config: &ConfigStore = &ctx.config;
    let db: &Database = &ctx.db;

    let mut directory = (ctx.connect)(&snapshot);
    let to_local = DirectoryToLocalSync::new(directory.as_mut(), db, config)
        .with_journal(db)
        .with_lock(ctx.to_local.clone())
        .synchronize();
    let local_ok = report("directory -> local", to_local);

    let mut directory = (ctx.connect)(&snapshot);
    let to_directory = LocalToDirectorySync::new(directory.as_mut(), db, config)
        .with_journal(db)
        .with_lock(ctx.to_directory.clone())
        .synchronize();
    let directory_ok = report("local -> directory", to_directory);

    let ok = local_ok && directory_ok;
    if ok {
        ctx.stats.consecutive_errors.store(0, Ordering::SeqCst);
    } else {
        let errors = ctx.stats.total_errors.fetch_add(1, Ordering::SeqCst) + 1;
        let consecutive = ctx.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            total_errors = errors,
            consecutive_errors = consecutive,
            "sync cycle finished with errors"
        );
    }
    ok
}

fn report(pass: &str, result: Result<SyncRunStats, SyncError>) -> bool {
    match result {
        Ok(stats) => {
            info!(
                pass,
                run_id = %stats.run_id,
                created = stats.created,
                updated = stats.updated,
                skipped = stats.skipped,
                failed = stats.failed,
                "pass completed"
            );
            true
        }
        Err(SyncError::Disabled(_)) => {
            debug!(pass, "pass disabled");
            true
        }
        Err(e) => {
            error!(pass, error = %e, "pass aborted");
            false
        }
    }
}
