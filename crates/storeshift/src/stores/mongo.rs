//! MongoDB store driven through `mongodump` / `mongorestore`

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use tracing::{info, warn};

use super::{run_tool, DocumentStore};
use crate::config::Endpoint;
use crate::error::{MigrationError, Result};

pub struct MongoStore {
    uri: String,
    database: Option<String>,
    address: String,
    /// Database name the dumps being restored were taken from
    source_database: Option<String>,
}

impl MongoStore {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            uri: endpoint.mongo_uri(),
            database: endpoint.database.clone(),
            address: endpoint.address(),
            source_database: None,
        }
    }

    /// Restores rename namespaces of `database` into this store's database
    pub fn restoring_from(mut self, database: Option<String>) -> Self {
        self.source_database = database;
        self
    }

    pub(crate) fn restore_args(&self, dir: &Path) -> Vec<String> {
        let mut args = vec![format!("--uri={}", self.uri), "--drop".to_string()];

        match (&self.source_database, &self.database) {
            (Some(from), Some(to)) if from != to => {
                args.push(format!("--nsFrom={from}.*"));
                args.push(format!("--nsTo={to}.*"));
            },
            (None, Some(to)) => {
                warn!(address = %self.address, database = %to, "Source database unknown, restoring under the dumped names");
            },
            _ => {},
        }

        args.push(dir.display().to_string());
        args
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn export_to(&self, dir: &Path) -> Result<()> {
        let mut args = vec![
            format!("--uri={}", self.uri),
            format!("--out={}", dir.display()),
        ];
        if let Some(ref database) = self.database {
            args.push(format!("--db={database}"));
        }

        run_tool("mongodump", &args).await?;
        info!(address = %self.address, dir = %dir.display(), "MongoDB dump written");
        Ok(())
    }

    async fn import_from(&self, dir: &Path) -> Result<u64> {
        let args = self.restore_args(dir);
        let output = run_tool("mongorestore", &args).await?;
        // mongorestore reports its summary on stderr
        let summary = String::from_utf8_lossy(&output.stderr);
        let restored = restored_documents(&summary)?;

        if restored.is_none() {
            warn!(address = %self.address, "mongorestore summary not found, counting 0 documents");
        }
        Ok(restored.unwrap_or(0))
    }
}

/// Documents restored according to mongorestore's closing summary line
pub(crate) fn restored_documents(summary: &str) -> Result<Option<u64>> {
    let pattern = Regex::new(r"(\d+) document\(s\) restored successfully")
        .map_err(|err| MigrationError::transfer("mongorestore", err.to_string()))?;

    Ok(pattern
        .captures(summary)
        .and_then(|caps| caps.get(1))
        .and_then(|count| count.as_str().parse().ok()))
}
