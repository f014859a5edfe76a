//! storeshift - Main entry point

use clap::Parser;
use std::process;
use storeshift::{commands, Cli, Commands};
use storeshift_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use tracing::error;

#[tokio::main]
async fn main() {
    // Usage errors exit with code 2
    let cli = Cli::parse();

    // .env may carry LOG_* settings as well as store endpoints
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Both)
        .log_dir(
            std::env::var("MIGRATION_LOGS_DIR").unwrap_or_else(|_| storeshift::config::DEFAULT_LOGS_DIR.to_string()),
        )
        .log_file_prefix("storeshift")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        },
    };

    let result = match cli.command {
        Commands::Run(ref args) => commands::run::run(args).await,
        Commands::Check => commands::check::run().await,
        Commands::Verify { ref report } => commands::verify::run(report).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            1
        },
    };

    // Flush buffered file logs before exiting
    drop(guard);
    process::exit(code);
}
