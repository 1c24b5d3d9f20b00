//! Counters for one orchestrator run.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::SyncDirection;

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    /// Disabled, restricted, or nothing to do.
    Skipped,
}

/// Statistics from a single pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunStats {
    /// Correlates log lines and journal rows of one run.
    pub run_id: Uuid,
    pub direction: SyncDirection,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    started: Instant,
    #[serde(skip)]
    elapsed: Option<Duration>,
}

impl SyncRunStats {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            direction,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            started_at: Utc::now(),
            started: Instant::now(),
            elapsed: None,
        }
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.record_created(),
            RecordOutcome::Updated => self.record_updated(),
            RecordOutcome::Skipped => self.record_skipped(),
        }
    }

    pub fn record_created(&mut self) {
        self.created += 1;
    }

    pub fn record_updated(&mut self) {
        self.updated += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// Freeze the elapsed time. Later calls keep the first value.
    pub fn finish(&mut self) {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.started.elapsed());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped + self.failed
    }

    pub fn summary(&self) -> String {
        format!(
            "created: {}, updated: {}, skipped: {}, failed: {}, elapsed: {:.1}s",
            self.created,
            self.updated,
            self.skipped,
            self.failed,
            self.elapsed().as_secs_f64()
        )
    }
}
