//! `storeshift run` command implementation

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::report::render_summary;
use crate::stores::StoreSet;
use crate::RunArgs;

/// Run a full migration and print its summary
pub async fn run(args: &RunArgs) -> Result<i32> {
    let mut config = Config::load().context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let stores = StoreSet::from_config(&config).context("Failed to set up store clients")?;
    let orchestrator = Orchestrator::new(config.migration.clone(), stores);

    println!("{} {}", "Migration run".cyan().bold(), orchestrator.run_id());
    let outcome = orchestrator.run().await;

    println!();
    println!("{}", render_summary(&outcome.report));
    println!();

    match outcome.report_path {
        Some(ref path) => println!("Report: {}", path.display()),
        None => println!("{}", "Report could not be written, see logs".yellow()),
    }

    if outcome.exit_code == 0 {
        println!("{}", "Migration completed successfully".green().bold());
    } else {
        println!("{}", "Migration finished with failures".red().bold());
    }

    Ok(outcome.exit_code)
}
