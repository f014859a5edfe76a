//! `storeshift verify` command implementation
//!
//! Re-digests every backup artifact listed in a report and compares it with
//! the checksum recorded when it was written.

use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::path::Path;
use storeshift_common::{checksum, CommonError};

use crate::report::MigrationReport;

/// Verification result of one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    Intact,
    Modified { actual: String },
    Missing,
}

/// Check every artifact of a report; exit code 1 if any is missing or modified
pub async fn run(report_path: &Path) -> Result<i32> {
    let report = MigrationReport::load(report_path)
        .with_context(|| format!("Failed to read report {}", report_path.display()))?;

    let results = verify_artifacts(&report)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Artifact", "Path", "Status"]);

    let mut failures = 0;
    for (name, path, status) in &results {
        let status = match status {
            ArtifactStatus::Intact => "intact".to_string(),
            ArtifactStatus::Modified { actual } => {
                failures += 1;
                format!("modified ({})", &actual[..actual.len().min(12)])
            },
            ArtifactStatus::Missing => {
                failures += 1;
                "missing".to_string()
            },
        };
        table.add_row(vec![name.clone(), path.clone(), status]);
    }

    println!("{table}");

    if results.is_empty() {
        println!("{}", "Report lists no backup artifacts".yellow());
    } else if failures == 0 {
        println!("{}", "All backup artifacts intact".green().bold());
    } else {
        println!("{}", format!("{failures} artifact(s) failed verification").red().bold());
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

/// Compare each artifact on disk with its recorded checksum
pub fn verify_artifacts(report: &MigrationReport) -> Result<Vec<(String, String, ArtifactStatus)>> {
    let mut results = Vec::with_capacity(report.artifacts.len());

    for artifact in &report.artifacts {
        let status = if !artifact.path.exists() {
            ArtifactStatus::Missing
        } else {
            match checksum::verify_path(&artifact.path, &artifact.checksum) {
                Ok(()) => ArtifactStatus::Intact,
                Err(CommonError::ChecksumMismatch { actual, .. }) => ArtifactStatus::Modified { actual },
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to digest {}", artifact.path.display()))
                },
            }
        };
        results.push((artifact.name.clone(), artifact.path.display().to_string(), status));
    }

    Ok(results)
}
