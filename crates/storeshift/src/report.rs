//! Final run report
//!
//! The report is a projection of [`MigrationState`]; building it cannot fail
//! and persisting it only logs on error, so a report is produced for every
//! run no matter how far it got.

use chrono::{DateTime, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::Result;
use crate::state::{BackupArtifact, MigrationState, Phase, PhaseFailure, StatisticsSnapshot, TableOutcome};

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    PartialFailure,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::PartialFailure => write!(f, "PARTIAL_FAILURE"),
        }
    }
}

/// Persisted summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: RunStatus,
    pub statistics: StatisticsSnapshot,
    pub completed: Vec<Phase>,
    pub failed: Vec<Phase>,
    pub errors: Vec<PhaseFailure>,
    pub tables: Vec<TableOutcome>,
    pub checksums: BTreeMap<String, String>,
    pub artifacts: Vec<BackupArtifact>,
    pub backup_location: PathBuf,
}

impl MigrationReport {
    /// Read a previously persisted report
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Builds, persists and renders run reports
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    logs_dir: PathBuf,
    backup_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(logs_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir.join(format!("migration_report_{run_id}.json"))
    }

    /// Path for the `copy`-th report of a run id; the first copy has no suffix
    fn numbered_report_path(&self, run_id: &str, copy: u32) -> PathBuf {
        if copy <= 1 {
            self.report_path(run_id)
        } else {
            self.logs_dir.join(format!("migration_report_{run_id}_{copy}.json"))
        }
    }

    /// Project the run state into a report
    pub fn generate(&self, state: &MigrationState, start: DateTime<Utc>, end: DateTime<Utc>) -> MigrationReport {
        let duration_seconds = (end - start)
            .to_std()
            .map(|duration| duration.as_secs_f64())
            .unwrap_or(0.0);

        let status = if state.has_failures() {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        };

        MigrationReport {
            run_id: state.run_id().to_string(),
            start_time: start,
            end_time: end,
            duration_seconds,
            status,
            statistics: state.statistics.snapshot(),
            completed: state.completed().to_vec(),
            failed: state.failed().to_vec(),
            errors: state.errors().to_vec(),
            tables: state.tables.snapshot(),
            checksums: state.checksums().clone(),
            artifacts: state.artifacts().to_vec(),
            backup_location: self.backup_dir.clone(),
        }
    }

    /// Write the report as JSON; returns its path, or `None` after logging a failure
    ///
    /// Earlier reports are never replaced: a rerun under the same run id gets
    /// a numbered file next to the first one.
    pub fn persist(&self, report: &MigrationReport) -> Option<PathBuf> {
        match self.write_report(report) {
            Ok(path) => {
                info!(path = %path.display(), status = %report.status, "Report written");
                Some(path)
            },
            Err(err) => {
                error!(dir = %self.logs_dir.display(), error = %err, "Failed to write report");
                None
            },
        }
    }

    fn write_report(&self, report: &MigrationReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.logs_dir)?;
        let json = serde_json::to_vec_pretty(report)?;

        let mut copy = 1;
        loop {
            let path = self.numbered_report_path(&report.run_id, copy);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&json)?;
                    return Ok(path);
                },
                Err(err) if err.kind() == ErrorKind::AlreadyExists => copy += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Console summary of a report
pub fn render_summary(report: &MigrationReport) -> String {
    let stats = &report.statistics;
    let phases = |phases: &[Phase]| {
        if phases.is_empty() {
            "-".to_string()
        } else {
            phases.iter().map(Phase::as_str).collect::<Vec<_>>().join(", ")
        }
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Metric", "Value"]);

    table.add_row(vec!["Run".to_string(), report.run_id.clone()]);
    table.add_row(vec!["Status".to_string(), report.status.to_string()]);
    table.add_row(vec!["Duration".to_string(), format!("{:.2}s", report.duration_seconds)]);
    table.add_row(vec!["Tables processed".to_string(), stats.tables_processed.to_string()]);
    table.add_row(vec!["Rows migrated".to_string(), stats.rows_migrated.to_string()]);
    table.add_row(vec!["Rows skipped".to_string(), stats.rows_skipped.to_string()]);
    table.add_row(vec!["Keys processed".to_string(), stats.keys_processed.to_string()]);
    table.add_row(vec!["Documents processed".to_string(), stats.documents_processed.to_string()]);
    table.add_row(vec!["Completed phases".to_string(), phases(&report.completed)]);
    table.add_row(vec!["Failed phases".to_string(), phases(&report.failed)]);
    table.add_row(vec!["Backups".to_string(), report.backup_location.display().to_string()]);

    let mut summary = table.to_string();
    for failure in &report.errors {
        summary.push_str(&format!("\n[{}] {}", failure.phase, failure.message));
    }
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::MigrationError;

    fn generator(dir: &Path) -> ReportGenerator {
        ReportGenerator::new(dir.join("logs"), dir.join("backups"))
    }

    #[test]
    fn test_success_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = MigrationState::new("r1");
        state.mark_completed(Phase::Initialization);
        state.statistics.add_rows(10, 0);

        let start = Utc::now();
        let report = generator(dir.path()).generate(&state, start, start + chrono::Duration::seconds(3));

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.duration_seconds, 3.0);
        assert_eq!(report.statistics.rows_migrated, 10);
        assert!(report.is_success());
    }

    #[test]
    fn test_failure_report_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = MigrationState::new("r2");
        state.mark_completed(Phase::Initialization);
        state.mark_failed(
            Phase::PostgresMigration,
            &MigrationError::RowCountMismatch {
                table: "public.users".to_string(),
                expected: 5,
                actual: 4,
            },
        );

        let now = Utc::now();
        let report = generator(dir.path()).generate(&state, now, now);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "PARTIAL_FAILURE");
        assert_eq!(json["runId"], "r2");
        assert_eq!(json["failed"][0], "postgres_migration");
        assert_eq!(json["statistics"]["rowsMigrated"], 0);
        assert!(json["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("public.users"));
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let state = MigrationState::new("r3");
        let now = Utc::now();
        let report = generator.generate(&state, now, now);

        let path = generator.persist(&report).unwrap();
        assert_eq!(path, dir.path().join("logs/migration_report_r3.json"));
        assert_eq!(MigrationReport::load(&path).unwrap(), report);
    }

    #[test]
    fn test_rerun_report_never_replaces_earlier_one() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let now = Utc::now();

        let mut first_state = MigrationState::new("same");
        first_state.mark_completed(Phase::Initialization);
        let first = generator.generate(&first_state, now, now);
        let first_path = generator.persist(&first).unwrap();

        let mut second_state = MigrationState::new("same");
        second_state.mark_failed(Phase::Backup, &MigrationError::config("artifact exists"));
        let second = generator.generate(&second_state, now, now);
        let second_path = generator.persist(&second).unwrap();

        assert_eq!(second_path, dir.path().join("logs/migration_report_same_2.json"));
        assert!(MigrationReport::load(&first_path).unwrap().is_success());
        assert_eq!(MigrationReport::load(&second_path).unwrap(), second);
    }

    #[test]
    fn test_persist_failure_is_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let generator = generator(dir.path());
        let now = Utc::now();
        let report = generator.generate(&MigrationState::new("r4"), now, now);
        assert!(generator.persist(&report).is_none());
    }

    #[test]
    fn test_summary_lists_errors() {
        let mut state = MigrationState::new("r5");
        state.mark_failed(Phase::Backup, &MigrationError::config("boom"));
        let now = Utc::now();
        let report = ReportGenerator::new("logs", "backups").generate(&state, now, now);

        let summary = render_summary(&report);
        assert!(summary.contains("PARTIAL_FAILURE"));
        assert!(summary.contains("[backup]"));
    }
}
