//! `storeshift check` command implementation
//!
//! Runs only the connection validator; nothing is backed up or written.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::Config;
use crate::stores::StoreSet;
use crate::validator::validate_all;

/// Probe every configured store
pub async fn run() -> Result<i32> {
    let config = Config::load().context("Failed to load configuration")?;
    let stores = StoreSet::from_config(&config).context("Failed to set up store clients")?;

    match validate_all(&stores.probes).await {
        Ok(()) => {
            println!(
                "{} {} store endpoint(s) reachable",
                "OK".green().bold(),
                stores.probes.len()
            );
            Ok(0)
        },
        Err(err) => {
            println!("{} {}", "FAILED".red().bold(), err);
            Ok(1)
        },
    }
}
