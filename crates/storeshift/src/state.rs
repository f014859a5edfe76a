//! Migration state for a single run
//!
//! One `MigrationState` value is created per run and threaded through every
//! phase by the orchestrator. Phase progress only moves forward; counters
//! only grow. Counters are atomics so concurrently scheduled units of the
//! same phase can add to them through a shared reference.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use storeshift_common::StoreKind;

use crate::error::{MigrationError, Result};

/// Ordered stages of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialization,
    Backup,
    PostgresMigration,
    RedisMigration,
    DocumentMigration,
    Reporting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialization => "initialization",
            Phase::Backup => "backup",
            Phase::PostgresMigration => "postgres_migration",
            Phase::RedisMigration => "redis_migration",
            Phase::DocumentMigration => "document_migration",
            Phase::Reporting => "reporting",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-wide counters
#[derive(Debug, Default)]
pub struct Statistics {
    tables_processed: AtomicU64,
    rows_migrated: AtomicU64,
    rows_skipped: AtomicU64,
    keys_processed: AtomicU64,
    documents_processed: AtomicU64,
}

/// Point-in-time copy of [`Statistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub tables_processed: u64,
    pub rows_migrated: u64,
    /// Rows the target already held under the same key
    pub rows_skipped: u64,
    pub keys_processed: u64,
    pub documents_processed: u64,
}

impl Statistics {
    pub fn add_table(&self) {
        self.tables_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows(&self, migrated: u64, skipped: u64) {
        self.rows_migrated.fetch_add(migrated, Ordering::Relaxed);
        self.rows_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn add_keys(&self, count: u64) {
        self.keys_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_documents(&self, count: u64) {
        self.documents_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            tables_processed: self.tables_processed.load(Ordering::Relaxed),
            rows_migrated: self.rows_migrated.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            keys_processed: self.keys_processed.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one table's transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOutcome {
    pub table: String,
    pub source_rows: u64,
    pub target_rows: u64,
    pub skipped_empty: bool,
}

/// Tables verified so far, shared by concurrently running table units
#[derive(Debug, Default)]
pub struct TableLedger {
    tables: Mutex<Vec<TableOutcome>>,
}

impl TableLedger {
    pub fn record(&self, outcome: TableOutcome) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
    }

    pub fn snapshot(&self) -> Vec<TableOutcome> {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tables.sort_by(|a, b| a.table.cmp(&b.table));
        tables
    }
}

/// A backup artifact written during this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
    pub name: String,
    pub store: StoreKind,
    pub path: PathBuf,
    pub checksum: String,
}

/// An error recorded against a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseFailure {
    /// Phase name, or "orchestration" for errors raised between phases
    pub phase: String,
    pub message: String,
}

/// Everything known about a run in progress
#[derive(Debug)]
pub struct MigrationState {
    run_id: String,
    phase: Phase,
    completed: Vec<Phase>,
    failed: Vec<Phase>,
    errors: Vec<PhaseFailure>,
    artifacts: Vec<BackupArtifact>,
    checksums: BTreeMap<String, String>,
    pub statistics: Statistics,
    pub tables: TableLedger,
}

impl MigrationState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: Phase::Initialization,
            completed: Vec::new(),
            failed: Vec::new(),
            errors: Vec::new(),
            artifacts: Vec::new(),
            checksums: BTreeMap::new(),
            statistics: Statistics::default(),
            tables: TableLedger::default(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn completed(&self) -> &[Phase] {
        &self.completed
    }

    pub fn failed(&self) -> &[Phase] {
        &self.failed
    }

    pub fn errors(&self) -> &[PhaseFailure] {
        &self.errors
    }

    pub fn artifacts(&self) -> &[BackupArtifact] {
        &self.artifacts
    }

    pub fn checksums(&self) -> &BTreeMap<String, String> {
        &self.checksums
    }

    /// Move to `phase`; re-entering the current phase is allowed, going back is not
    pub fn enter(&mut self, phase: Phase) -> Result<()> {
        if phase < self.phase {
            return Err(MigrationError::PhaseRewind {
                from: self.phase.to_string(),
                to: phase.to_string(),
            });
        }
        self.phase = phase;
        Ok(())
    }

    pub fn mark_completed(&mut self, phase: Phase) {
        if !self.completed.contains(&phase) {
            self.completed.push(phase);
        }
    }

    pub fn mark_failed(&mut self, phase: Phase, err: &MigrationError) {
        if !self.failed.contains(&phase) {
            self.failed.push(phase);
        }
        self.errors.push(PhaseFailure {
            phase: phase.to_string(),
            message: err.to_string(),
        });
    }

    /// Record an error that happened outside any phase wrapper
    pub fn record_uncaught(&mut self, err: &MigrationError) {
        self.errors.push(PhaseFailure {
            phase: "orchestration".to_string(),
            message: err.to_string(),
        });
    }

    /// Record a written artifact and its checksum
    ///
    /// Each artifact name is recorded once per run; a second write under the
    /// same name is refused.
    pub fn record_artifact(&mut self, artifact: BackupArtifact) -> Result<()> {
        if self.checksums.contains_key(&artifact.name) {
            return Err(MigrationError::backup(
                artifact.store,
                format!("artifact '{}' was already recorded in this run", artifact.name),
            ));
        }
        self.checksums
            .insert(artifact.name.clone(), artifact.checksum.clone());
        self.artifacts.push(artifact);
        Ok(())
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.errors.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_zeroed() {
        let state = MigrationState::new("run-1");
        assert_eq!(state.phase(), Phase::Initialization);
        assert!(state.completed().is_empty());
        assert!(!state.has_failures());
        assert_eq!(state.statistics.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let mut state = MigrationState::new("run-1");
        state.enter(Phase::Backup).unwrap();
        state.enter(Phase::RedisMigration).unwrap();
        state.enter(Phase::RedisMigration).unwrap();

        let err = state.enter(Phase::PostgresMigration).unwrap_err();
        assert!(matches!(err, MigrationError::PhaseRewind { .. }));
        assert_eq!(state.phase(), Phase::RedisMigration);
    }

    #[test]
    fn test_failures_are_recorded_with_messages() {
        let mut state = MigrationState::new("run-1");
        state.mark_completed(Phase::Initialization);
        state.mark_failed(
            Phase::Backup,
            &MigrationError::backup(StoreKind::Postgres, "pg_dump not found"),
        );

        assert_eq!(state.completed(), &[Phase::Initialization]);
        assert_eq!(state.failed(), &[Phase::Backup]);
        assert_eq!(state.errors()[0].phase, "backup");
        assert!(state.errors()[0].message.contains("pg_dump not found"));
        assert!(state.has_failures());
    }

    #[test]
    fn test_artifact_names_are_write_once() {
        let mut state = MigrationState::new("run-1");
        let artifact = BackupArtifact {
            name: "redis_backup".to_string(),
            store: StoreKind::Redis,
            path: PathBuf::from("backups/redis/redis_backup_run-1.json"),
            checksum: "abc".to_string(),
        };

        state.record_artifact(artifact.clone()).unwrap();
        assert!(state.record_artifact(artifact).is_err());
        assert_eq!(state.checksums().get("redis_backup").map(String::as_str), Some("abc"));
        assert_eq!(state.artifacts().len(), 1);
    }

    #[test]
    fn test_counters_accumulate() {
        let state = MigrationState::new("run-1");
        state.statistics.add_table();
        state.statistics.add_rows(1000, 0);
        state.statistics.add_rows(500, 20);
        state.statistics.add_keys(100);
        state.statistics.add_documents(7);

        let snapshot = state.statistics.snapshot();
        assert_eq!(snapshot.tables_processed, 1);
        assert_eq!(snapshot.rows_migrated, 1500);
        assert_eq!(snapshot.rows_skipped, 20);
        assert_eq!(snapshot.keys_processed, 100);
        assert_eq!(snapshot.documents_processed, 7);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::PostgresMigration.to_string(), "postgres_migration");
        assert_eq!(
            serde_json::to_string(&Phase::DocumentMigration).unwrap(),
            "\"document_migration\""
        );
    }
}
