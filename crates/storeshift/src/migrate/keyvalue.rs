//! Key-value migration: typed per-key transfer in pipelined batches

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::scheduler::run_bounded;
use crate::state::Statistics;
use crate::stores::{Blob, KeyEntry, KeyValueStore, KeyWrite, StorePair};

/// Pattern matching every key
const ALL_KEYS: &str = "*";

/// Copies every key with its type and remaining TTL
#[derive(Debug, Clone)]
pub struct KeyValueMigrator {
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
}

impl KeyValueMigrator {
    pub fn new(batch_size: usize, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub async fn migrate(&self, stores: &StorePair<dyn KeyValueStore>, stats: &Statistics) -> Result<()> {
        let keys = self
            .retry
            .run("key enumeration", || stores.source.scan_keys(ALL_KEYS))
            .await?;

        let batches: Vec<(usize, Vec<Blob>)> = keys
            .chunks(self.batch_size)
            .map(<[Blob]>::to_vec)
            .enumerate()
            .collect();

        info!(
            keys = keys.len(),
            batches = batches.len(),
            concurrency = self.concurrency,
            "Starting key-value migration"
        );

        run_bounded(batches, self.concurrency, |(index, batch)| {
            self.migrate_batch(stores, stats, index, batch)
        })
        .await?;

        Ok(())
    }

    async fn migrate_batch(
        &self,
        stores: &StorePair<dyn KeyValueStore>,
        stats: &Statistics,
        index: usize,
        keys: Vec<Blob>,
    ) -> Result<()> {
        let unit = format!("key batch {index}");
        let source = stores.source.as_ref();
        let mut writes: Vec<KeyWrite> = Vec::new();

        for key in &keys {
            let entry = self.retry.run(&key.to_string(), || read_entry(source, key)).await?;
            match entry {
                Some(entry) => writes.extend(entry.write_ops()),
                None => warn!(key = %key, "Key disappeared before it could be read, skipping"),
            }
        }

        self.retry
            .run(&unit, || stores.target.apply(&writes))
            .await?;

        stats.add_keys(keys.len() as u64);
        debug!(batch = index, keys = keys.len(), commands = writes.len(), "Key batch committed");
        Ok(())
    }
}

/// Read one key's type, TTL and value; `None` when the key no longer exists
pub async fn read_entry(store: &dyn KeyValueStore, key: &Blob) -> Result<Option<KeyEntry>> {
    let Some(key_type) = store.key_type(key).await? else {
        return Ok(None);
    };
    let ttl_ms = store.ttl_millis(key).await?;
    let value = store.read_value(key, key_type).await?;

    Ok(Some(KeyEntry {
        key: key.clone(),
        value,
        ttl_ms,
    }))
}
