//! Document migration through the store's bulk export/import tools

use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::state::Statistics;
use crate::stores::{DocumentStore, StorePair};

/// Exports the source into a staging directory and restores it on the target
#[derive(Debug, Clone)]
pub struct DocumentMigrator {
    staging_dir: PathBuf,
    retry: RetryPolicy,
}

impl DocumentMigrator {
    pub fn new(staging_dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            retry,
        }
    }

    pub async fn migrate(&self, stores: &StorePair<dyn DocumentStore>, stats: &Statistics) -> Result<()> {
        let staging = self.staging_dir.as_path();
        tokio::fs::create_dir_all(staging).await?;

        info!(staging = %staging.display(), "Exporting documents from source");
        self.retry
            .run("document export", || stores.source.export_to(staging))
            .await?;

        info!("Restoring documents on target");
        let restored = self
            .retry
            .run("document import", || stores.target.import_from(staging))
            .await?;
        stats.add_documents(restored);

        if let Err(err) = tokio::fs::remove_dir_all(staging).await {
            warn!(staging = %staging.display(), error = %err, "Could not remove document staging directory");
        }

        info!(documents = restored, "Document migration finished");
        Ok(())
    }
}
