//! storeshift
//!
//! One-shot migration of a PostgreSQL database, a Redis keyspace and an
//! optional MongoDB deployment from a source to a target environment.
//!
//! # Overview
//!
//! - **Validation**: every source and target store is probed before work starts
//! - **Backups**: each source store is snapshotted and checksummed first
//! - **Migration**: tables in verified batches, keys by type with their TTLs,
//!   documents through the store's dump/restore tools
//! - **Reporting**: a JSON report per run plus a console summary
//!
//! The binary wraps [`orchestrator::Orchestrator`]; everything it does is
//! available as a library with the stores behind traits.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod backup;
pub mod commands;
pub mod config;
pub mod error;
pub mod migrate;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod stores;
pub mod validator;

// Re-export commonly used types
pub use config::Config;
pub use error::{MigrationError, Result};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use report::{MigrationReport, RunStatus};
pub use state::{MigrationState, Phase};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// storeshift - move PostgreSQL, Redis and MongoDB data between deployments
#[derive(Parser, Debug)]
#[command(name = "storeshift")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up, migrate and verify every configured store
    Run(RunArgs),

    /// Only validate connectivity to every configured store
    Check,

    /// Re-check the checksums of the backups listed in a report
    Verify {
        /// Path to a migration_report_<run>.json file
        #[arg(short, long)]
        report: PathBuf,
    },
}

/// Overrides for values otherwise read from the environment
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Rows per relational batch
    #[arg(long)]
    pub pg_batch_size: Option<usize>,

    /// Keys per key-value batch
    #[arg(long)]
    pub redis_batch_size: Option<usize>,

    /// Tables or key batches transferred at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Attempts per batch before the phase fails
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Directory for backup artifacts
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Directory for reports
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Apply the overrides that were given on the command line
    pub fn apply(&self, config: &mut Config) {
        let settings = &mut config.migration;
        if let Some(size) = self.pg_batch_size {
            settings.postgres_batch_size = size;
        }
        if let Some(size) = self.redis_batch_size {
            settings.redis_batch_size = size;
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(attempts) = self.max_attempts {
            settings.max_attempts = attempts;
        }
        if let Some(ref dir) = self.backup_dir {
            settings.backup_dir = dir.clone();
        }
        if let Some(ref dir) = self.logs_dir {
            settings.logs_dir = dir.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "storeshift",
            "run",
            "--pg-batch-size",
            "250",
            "--concurrency",
            "4",
            "--backup-dir",
            "/tmp/b",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = Config {
            source: test_deployment(),
            target: test_deployment(),
            migration: Default::default(),
        };
        args.apply(&mut config);

        assert_eq!(config.migration.postgres_batch_size, 250);
        assert_eq!(config.migration.concurrency, 4);
        assert_eq!(config.migration.redis_batch_size, config::DEFAULT_REDIS_BATCH_SIZE);
        assert_eq!(config.migration.backup_dir, PathBuf::from("/tmp/b"));
    }

    #[test]
    fn test_verify_requires_report() {
        assert!(Cli::try_parse_from(["storeshift", "verify"]).is_err());
    }

    fn test_deployment() -> config::Deployment {
        config::Deployment {
            postgres: config::Endpoint::new("localhost", 5432),
            redis: config::Endpoint::new("localhost", 6379),
            mongodb: None,
        }
    }
}
