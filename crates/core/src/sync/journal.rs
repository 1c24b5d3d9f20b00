//! Persistence of run summaries and per-record failures.

use chrono::Utc;

use super::stats::SyncRunStats;
use crate::db::Database;
use crate::errors::DatabaseError;
use crate::models::{AuditEntry, SyncDirection};

/// Action name of per-record failures in the audit log.
pub const RECORD_FAILED_ACTION: &str = "record_sync_failed";

/// Where orchestrators report what they did.
pub trait RunJournal: Send + Sync {
    /// Returns a run id when the journal keeps one.
    fn start_run(&self, direction: SyncDirection) -> Result<Option<i64>, DatabaseError>;

    fn complete_run(
        &self,
        run_id: Option<i64>,
        stats: &SyncRunStats,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;

    fn record_failure(
        &self,
        direction: SyncDirection,
        principal: &str,
        detail: &str,
    ) -> Result<(), DatabaseError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl RunJournal for NullJournal {
    fn start_run(&self, _direction: SyncDirection) -> Result<Option<i64>, DatabaseError> {
        Ok(None)
    }

    fn complete_run(
        &self,
        _run_id: Option<i64>,
        _stats: &SyncRunStats,
        _error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn record_failure(
        &self,
        _direction: SyncDirection,
        _principal: &str,
        _detail: &str,
    ) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// kv_state key holding the completion time of the last run.
pub fn last_run_key(direction: SyncDirection) -> &'static str {
    match direction {
        SyncDirection::DirectoryToLocal => "last_sync_to_local_at",
        SyncDirection::LocalToDirectory => "last_sync_to_directory_at",
    }
}

impl RunJournal for Database {
    fn start_run(&self, direction: SyncDirection) -> Result<Option<i64>, DatabaseError> {
        self.start_sync_run(direction).map(Some)
    }

    fn complete_run(
        &self,
        run_id: Option<i64>,
        stats: &SyncRunStats,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let summary = stats.summary();
        let (status, details) = match error {
            None => ("completed", summary),
            Some(err) => ("failed", format!("{err} ({summary})")),
        };
        if let Some(id) = run_id {
            self.complete_sync_run(id, status, stats, Some(&details))?;
        }

        let action = format!("sync_{}", stats.direction);
        let entry = if error.is_none() {
            AuditEntry::success(&action, &details)
        } else {
            AuditEntry::failure(&action, &details)
        };
        self.insert_audit_entry(&entry, Some(stats.direction))?;

        if error.is_none() {
            self.set_state(last_run_key(stats.direction), &Utc::now().to_rfc3339())?;
        }
        Ok(())
    }

    fn record_failure(
        &self,
        direction: SyncDirection,
        principal: &str,
        detail: &str,
    ) -> Result<(), DatabaseError> {
        let entry = AuditEntry::failure(RECORD_FAILED_ACTION, detail).with_principal(principal);
        self.insert_audit_entry(&entry, Some(direction))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_journal() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let run = db.start_run(SyncDirection::DirectoryToLocal).unwrap();
        assert!(run.is_some());
        db.record_failure(SyncDirection::DirectoryToLocal, "jdoe", "boom")
            .unwrap();
        let mut stats = SyncRunStats::new(SyncDirection::DirectoryToLocal);
        stats.record_failed();
        stats.finish();
        db.complete_run(run, &stats, None).unwrap();

        let runs = db.list_sync_runs(None, 5).unwrap();
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].failed, 1);
        assert!(db.get_state("last_sync_to_local_at").unwrap().is_some());

        let failures = db.list_audit_log(Some(RECORD_FAILED_ACTION), 10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].principal.as_deref(), Some("jdoe"));
        assert_eq!(db.list_audit_log(Some("sync_directory_to_local"), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_run_keeps_last_sync_time() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let run = db.start_run(SyncDirection::LocalToDirectory).unwrap();
        let stats = SyncRunStats::new(SyncDirection::LocalToDirectory);
        db.complete_run(run, &stats, Some("bind failed")).unwrap();
        assert_eq!(db.list_sync_runs(None, 5).unwrap()[0].status, "failed");
        assert!(db.get_state("last_sync_to_directory_at").unwrap().is_none());
    }
}
