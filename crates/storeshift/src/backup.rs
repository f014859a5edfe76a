//! Pre-migration backups of every source store
//!
//! One artifact per store per run, written before anything on a target is
//! touched. Artifact paths are derived from the run id and store kind and are
//! never overwritten. Each artifact's digest is recorded in the run state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{MigrationError, Result};
use crate::migrate::read_entry;
use crate::state::{BackupArtifact, MigrationState};
use crate::stores::{KeyEntry, KeyValueStore, StoreSet};
use storeshift_common::{checksum, StoreKind};

/// Type-tagged inventory of every key in a key-value store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInventory {
    pub run_id: String,
    pub keys: Vec<KeyEntry>,
}

/// Writes one backup artifact per configured source store
#[derive(Debug, Clone)]
pub struct BackupProducer {
    backup_dir: PathBuf,
}

impl BackupProducer {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Deterministic artifact location for a store in a run
    pub fn artifact_path(&self, kind: StoreKind, run_id: &str) -> PathBuf {
        let file_name = match kind {
            StoreKind::Postgres => format!("{}_{run_id}.sql", kind.backup_name()),
            StoreKind::Redis => format!("{}_{run_id}.json", kind.backup_name()),
            StoreKind::Mongodb => format!("{}_{run_id}", kind.backup_name()),
        };
        self.backup_dir.join(kind.as_str()).join(file_name)
    }

    /// Back up every source store, stopping at the first failure
    pub async fn run(&self, state: &mut MigrationState, stores: &StoreSet) -> Result<()> {
        let run_id = state.run_id().to_string();

        let path = self.prepare(StoreKind::Postgres, &run_id).await?;
        info!(path = %path.display(), "Backing up relational store");
        stores.relational.source.dump(&path).await?;
        self.record(state, StoreKind::Postgres, path).await?;

        let path = self.prepare(StoreKind::Redis, &run_id).await?;
        info!(path = %path.display(), "Backing up key-value store");
        write_key_inventory(stores.key_value.source.as_ref(), &run_id, &path).await?;
        self.record(state, StoreKind::Redis, path).await?;

        match stores.documents {
            Some(ref documents) => {
                let path = self.prepare(StoreKind::Mongodb, &run_id).await?;
                info!(path = %path.display(), "Backing up document store");
                documents.source.export_to(&path).await?;
                self.record(state, StoreKind::Mongodb, path).await?;
            },
            None => info!("No document store configured, skipping its backup"),
        }

        Ok(())
    }

    /// Create the store's directory and make sure the artifact is new
    async fn prepare(&self, kind: StoreKind, run_id: &str) -> Result<PathBuf> {
        let path = self.artifact_path(kind, run_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&path).await? {
            return Err(MigrationError::backup(
                kind,
                format!("artifact {} already exists", path.display()),
            ));
        }
        Ok(path)
    }

    async fn record(&self, state: &mut MigrationState, kind: StoreKind, path: PathBuf) -> Result<()> {
        let digest_target = path.clone();
        let checksum = tokio::task::spawn_blocking(move || checksum::digest_path(&digest_target))
            .await
            .map_err(|err| MigrationError::backup(kind, format!("checksum task failed: {err}")))??;

        info!(store = %kind, path = %path.display(), checksum = %checksum, "Backup artifact recorded");

        state.record_artifact(BackupArtifact {
            name: kind.backup_name(),
            store: kind,
            path,
            checksum,
        })
    }
}

async fn write_key_inventory(store: &dyn KeyValueStore, run_id: &str, path: &Path) -> Result<()> {
    let keys = store.scan_keys("*").await?;
    let mut entries = Vec::with_capacity(keys.len());

    for key in &keys {
        match read_entry(store, key).await? {
            Some(entry) => entries.push(entry),
            None => warn!(key = %key, "Key disappeared during backup, not included"),
        }
    }

    let inventory = KeyInventory {
        run_id: run_id.to_string(),
        keys: entries,
    };
    let bytes = serde_json::to_vec_pretty(&inventory)?;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;

    info!(keys = inventory.keys.len(), "Key inventory written");
    Ok(())
}
