//! Phase sequencing and the run verdict
//!
//! `initialization -> backup -> postgres_migration -> redis_migration ->
//! document_migration (when configured) -> reporting`. A failing phase is
//! recorded and stops the pipeline; reporting always runs.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tracing::{error, info};

use crate::backup::BackupProducer;
use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::migrate::{DocumentMigrator, KeyValueMigrator, RelationalMigrator};
use crate::report::{MigrationReport, ReportGenerator};
use crate::state::{MigrationState, Phase};
use crate::stores::StoreSet;
use crate::validator::validate_all;

/// What a finished run hands back to the caller
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// 0 when nothing failed, 1 otherwise
    pub exit_code: i32,
    pub report: MigrationReport,
    /// `None` when the report could not be written
    pub report_path: Option<PathBuf>,
}

pub struct Orchestrator {
    settings: MigrationSettings,
    stores: StoreSet,
    run_id: String,
}

impl Orchestrator {
    pub fn new(settings: MigrationSettings, stores: StoreSet) -> Self {
        Self {
            settings,
            stores,
            run_id: new_run_id(Utc::now()),
        }
    }

    /// Use a fixed run id instead of the start timestamp
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run every phase and produce the report
    pub async fn run(&self) -> RunOutcome {
        let start = Utc::now();
        let mut state = MigrationState::new(self.run_id.clone());

        info!(run_id = %self.run_id, "Starting migration run");

        match AssertUnwindSafe(self.execute(&mut state)).catch_unwind().await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                error!(run_id = %self.run_id, error = %err, "Run stopped outside any phase");
                state.record_uncaught(&err);
            },
            Err(panic) => {
                let err = MigrationError::Panicked(panic_message(panic.as_ref()));
                let phase = state.phase();
                error!(run_id = %self.run_id, phase = %phase, error = %err, "Phase panicked");
                state.mark_failed(phase, &err);
            },
        }

        self.report(&mut state, start)
    }

    #[tracing::instrument(skip_all, fields(run_id = %state.run_id()))]
    async fn execute(&self, state: &mut MigrationState) -> Result<()> {
        let settings = &self.settings;
        let retry = settings.retry_policy();

        state.enter(Phase::Initialization)?;
        let outcome = validate_all(&self.stores.probes).await;
        if !conclude(state, Phase::Initialization, outcome) {
            return Ok(());
        }

        state.enter(Phase::Backup)?;
        let outcome = BackupProducer::new(&settings.backup_dir)
            .run(state, &self.stores)
            .await;
        if !conclude(state, Phase::Backup, outcome) {
            return Ok(());
        }

        state.enter(Phase::PostgresMigration)?;
        let outcome = RelationalMigrator::new(settings.postgres_batch_size, settings.concurrency, retry)
            .migrate(&self.stores.relational, &state.statistics, &state.tables)
            .await;
        if !conclude(state, Phase::PostgresMigration, outcome) {
            return Ok(());
        }

        state.enter(Phase::RedisMigration)?;
        let outcome = KeyValueMigrator::new(settings.redis_batch_size, settings.concurrency, retry)
            .migrate(&self.stores.key_value, &state.statistics)
            .await;
        if !conclude(state, Phase::RedisMigration, outcome) {
            return Ok(());
        }

        if let Some(ref documents) = self.stores.documents {
            state.enter(Phase::DocumentMigration)?;
            let staging = settings
                .backup_dir
                .join("mongodb")
                .join(format!("transfer_{}", state.run_id()));
            let outcome = DocumentMigrator::new(staging, retry)
                .migrate(documents, &state.statistics)
                .await;
            if !conclude(state, Phase::DocumentMigration, outcome) {
                return Ok(());
            }
        } else {
            info!("No document store configured, skipping document migration");
        }

        Ok(())
    }

    fn report(&self, state: &mut MigrationState, start: DateTime<Utc>) -> RunOutcome {
        match state.enter(Phase::Reporting) {
            Ok(()) => state.mark_completed(Phase::Reporting),
            Err(err) => state.record_uncaught(&err),
        }

        let generator = ReportGenerator::new(&self.settings.logs_dir, &self.settings.backup_dir);
        let report = generator.generate(state, start, Utc::now());
        let report_path = generator.persist(&report);
        let exit_code = if report.is_success() { 0 } else { 1 };

        info!(
            run_id = %report.run_id,
            status = %report.status,
            duration_seconds = report.duration_seconds,
            tables = report.statistics.tables_processed,
            rows = report.statistics.rows_migrated,
            keys = report.statistics.keys_processed,
            documents = report.statistics.documents_processed,
            "Migration run finished"
        );

        RunOutcome {
            exit_code,
            report,
            report_path,
        }
    }
}

/// Record a phase outcome; returns whether the run should continue
fn conclude(state: &mut MigrationState, phase: Phase, outcome: Result<()>) -> bool {
    match outcome {
        Ok(()) => {
            info!(phase = %phase, "Phase completed");
            state.mark_completed(phase);
            true
        },
        Err(err) => {
            error!(phase = %phase, error = %err, "Phase failed, aborting run");
            state.mark_failed(phase, &err);
            false
        },
    }
}

/// Run ids sort chronologically and are safe in file names
pub fn new_run_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
