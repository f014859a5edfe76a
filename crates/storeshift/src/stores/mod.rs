//! Store abstractions
//!
//! Migrators and the backup producer talk to stores only through these
//! traits. Production implementations wrap PostgreSQL (`sqlx`), Redis
//! (`redis`) and MongoDB (its dump/restore tools); tests substitute
//! in-memory fakes.

pub mod keys;
pub mod mongo;
pub mod postgres;
pub mod redis_store;
pub mod table;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::error::{MigrationError, Result};
use crate::validator::{ConnectionProbe, EndpointProbe};
use storeshift_common::{StoreKind, StoreRole};

pub use keys::{Blob, KeyEntry, KeyType, KeyValue, KeyWrite, ScoredMember};
pub use table::{json_array, Row, TableRef};

/// Relational store operations used by the migrator and backup producer
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Base tables, schema-qualified, in catalog order
    async fn list_tables(&self) -> Result<Vec<TableRef>>;

    async fn count_rows(&self, table: &TableRef) -> Result<u64>;

    /// Rows ordered by the first column ascending
    async fn fetch_batch(&self, table: &TableRef, offset: u64, limit: usize) -> Result<Vec<Row>>;

    /// Bulk insert ignoring key conflicts; returns the number of rows inserted
    async fn insert_batch(&self, table: &TableRef, rows: &[Row]) -> Result<u64>;

    /// Write a standalone logical dump of the whole database to `path`
    async fn dump(&self, path: &Path) -> Result<()>;
}

/// Key-value store operations used by the migrator and backup producer
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Every key matching `pattern`, without duplicates
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<Blob>>;

    /// `None` when the key does not exist
    async fn key_type(&self, key: &Blob) -> Result<Option<KeyType>>;

    /// Remaining TTL in milliseconds, `None` for persistent or missing keys
    async fn ttl_millis(&self, key: &Blob) -> Result<Option<u64>>;

    /// Read the value with the accessor matching `key_type`
    async fn read_value(&self, key: &Blob, key_type: KeyType) -> Result<KeyValue>;

    /// Submit all writes as a single pipeline
    async fn apply(&self, writes: &[KeyWrite]) -> Result<()>;
}

/// Document store bulk export/import
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Dump every database into `dir`
    async fn export_to(&self, dir: &Path) -> Result<()>;

    /// Restore a dump directory, replacing existing collections; returns documents restored
    async fn import_from(&self, dir: &Path) -> Result<u64>;
}

/// Source and target of one store kind
#[derive(Clone)]
pub struct StorePair<S: ?Sized> {
    pub source: Arc<S>,
    pub target: Arc<S>,
}

impl<S: ?Sized> StorePair<S> {
    pub fn new(source: Arc<S>, target: Arc<S>) -> Self {
        Self { source, target }
    }
}

/// Every store taking part in a run plus the probes that validate them
pub struct StoreSet {
    pub relational: StorePair<dyn RelationalStore>,
    pub key_value: StorePair<dyn KeyValueStore>,
    pub documents: Option<StorePair<dyn DocumentStore>>,
    pub probes: Vec<Box<dyn ConnectionProbe>>,
}

impl StoreSet {
    /// Build production stores from configuration
    ///
    /// No network traffic happens here: pools and connection managers are
    /// created lazily, so unreachable stores surface in the validator.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.migration.connect_timeout();
        let (source, target) = (&config.source, &config.target);

        let relational = StorePair::new(
            Arc::new(postgres::PostgresStore::connect_lazy(&source.postgres, timeout)?)
                as Arc<dyn RelationalStore>,
            Arc::new(postgres::PostgresStore::connect_lazy(&target.postgres, timeout)?)
                as Arc<dyn RelationalStore>,
        );

        let key_value = StorePair::new(
            Arc::new(redis_store::RedisStore::open(&source.redis, timeout)?) as Arc<dyn KeyValueStore>,
            Arc::new(redis_store::RedisStore::open(&target.redis, timeout)?) as Arc<dyn KeyValueStore>,
        );

        let mut probes: Vec<Box<dyn ConnectionProbe>> = vec![
            Box::new(EndpointProbe::new(StoreKind::Postgres, StoreRole::Source, source.postgres.clone(), timeout)),
            Box::new(EndpointProbe::new(StoreKind::Postgres, StoreRole::Target, target.postgres.clone(), timeout)),
            Box::new(EndpointProbe::new(StoreKind::Redis, StoreRole::Source, source.redis.clone(), timeout)),
            Box::new(EndpointProbe::new(StoreKind::Redis, StoreRole::Target, target.redis.clone(), timeout)),
        ];

        let documents = match (&source.mongodb, &target.mongodb) {
            (Some(source_mongo), Some(target_mongo)) => {
                probes.push(Box::new(EndpointProbe::new(
                    StoreKind::Mongodb,
                    StoreRole::Source,
                    source_mongo.clone(),
                    timeout,
                )));
                probes.push(Box::new(EndpointProbe::new(
                    StoreKind::Mongodb,
                    StoreRole::Target,
                    target_mongo.clone(),
                    timeout,
                )));
                Some(StorePair::new(
                    Arc::new(mongo::MongoStore::new(source_mongo)) as Arc<dyn DocumentStore>,
                    Arc::new(
                        mongo::MongoStore::new(target_mongo).restoring_from(source_mongo.database.clone()),
                    ) as Arc<dyn DocumentStore>,
                ))
            },
            _ => None,
        };

        Ok(Self {
            relational,
            key_value,
            documents,
            probes,
        })
    }
}

/// Run an external tool to completion, capturing its output
///
/// A non-zero exit becomes [`MigrationError::Tool`] carrying stderr.
pub(crate) async fn run_tool(program: &str, args: &[String]) -> Result<std::process::Output> {
    debug!(program, args = args.len(), "Running external tool");

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| MigrationError::Tool {
            program: program.to_string(),
            status: "spawn failure".to_string(),
            stderr: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(MigrationError::Tool {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}
