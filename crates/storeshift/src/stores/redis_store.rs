//! Redis store backed by a lazily established `ConnectionManager`
//!
//! Keys and payloads are read and written as raw bytes, so values that are
//! not UTF-8 transfer unchanged.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{Blob, KeyType, KeyValue, KeyValueStore, KeyWrite, ScoredMember};
use crate::config::Endpoint;
use crate::error::{MigrationError, Result};

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 1000;

pub struct RedisStore {
    client: Client,
    endpoint: Endpoint,
    timeout: Duration,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// Parse the endpoint; the connection is opened on first command
    pub fn open(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::open(endpoint.redis_url())?,
            endpoint: endpoint.clone(),
            timeout,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                match tokio::time::timeout(self.timeout, connect).await {
                    Ok(manager) => Ok(manager?),
                    Err(_) => Err(MigrationError::transfer(
                        self.endpoint.address(),
                        format!("no connection within {}s", self.timeout.as_secs()),
                    )),
                }
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<Blob>> {
        let mut conn = self.connection().await?;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        // SCAN may return a key more than once across iterations
        loop {
            let (next_cursor, batch): (u64, Vec<Vec<u8>>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            for key in batch {
                if seen.insert(key.clone()) {
                    keys.push(Blob::from(key));
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(address = %self.endpoint.address(), keys = keys.len(), "Scanned keys");
        Ok(keys)
    }

    async fn key_type(&self, key: &Blob) -> Result<Option<KeyType>> {
        let mut conn = self.connection().await?;
        let type_name: String = cmd("TYPE").arg(key.as_bytes()).query_async(&mut conn).await?;
        KeyType::from_type_name(key, &type_name)
    }

    async fn ttl_millis(&self, key: &Blob) -> Result<Option<u64>> {
        let mut conn = self.connection().await?;
        let ttl: i64 = cmd("PTTL").arg(key.as_bytes()).query_async(&mut conn).await?;
        // -1 persistent, -2 missing
        Ok(u64::try_from(ttl).ok())
    }

    async fn read_value(&self, key: &Blob, key_type: KeyType) -> Result<KeyValue> {
        let mut conn = self.connection().await?;
        let key = key.as_bytes();

        let value = match key_type {
            KeyType::String => {
                let value: Vec<u8> = cmd("GET").arg(key).query_async(&mut conn).await?;
                KeyValue::String(value.into())
            },
            KeyType::List => {
                let items: Vec<Vec<u8>> = cmd("LRANGE")
                    .arg(key)
                    .arg(0)
                    .arg(-1)
                    .query_async(&mut conn)
                    .await?;
                KeyValue::List(items.into_iter().map(Blob::from).collect())
            },
            KeyType::Set => {
                let members: Vec<Vec<u8>> = cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
                let mut members: Vec<Blob> = members.into_iter().map(Blob::from).collect();
                members.sort();
                KeyValue::Set(members)
            },
            KeyType::Hash => {
                let fields: BTreeMap<Vec<u8>, Vec<u8>> =
                    cmd("HGETALL").arg(key).query_async(&mut conn).await?;
                KeyValue::Hash(
                    fields
                        .into_iter()
                        .map(|(field, value)| (Blob::from(field), Blob::from(value)))
                        .collect(),
                )
            },
            KeyType::SortedSet => {
                let members: Vec<(Vec<u8>, f64)> = cmd("ZRANGE")
                    .arg(key)
                    .arg(0)
                    .arg(-1)
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await?;
                KeyValue::SortedSet(
                    members
                        .into_iter()
                        .map(|(member, score)| ScoredMember {
                            member: member.into(),
                            score,
                        })
                        .collect(),
                )
            },
        };

        Ok(value)
    }

    async fn apply(&self, writes: &[KeyWrite]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for write in writes {
            match write {
                KeyWrite::Delete { key } => {
                    pipe.cmd("DEL").arg(key.as_bytes()).ignore();
                },
                KeyWrite::Set { key, value } => {
                    pipe.cmd("SET").arg(key.as_bytes()).arg(value.as_bytes()).ignore();
                },
                KeyWrite::RightPush { key, items } => {
                    let command = pipe.cmd("RPUSH").arg(key.as_bytes());
                    for item in items {
                        command.arg(item.as_bytes());
                    }
                    command.ignore();
                },
                KeyWrite::SetAdd { key, members } => {
                    let command = pipe.cmd("SADD").arg(key.as_bytes());
                    for member in members {
                        command.arg(member.as_bytes());
                    }
                    command.ignore();
                },
                KeyWrite::HashSet { key, fields } => {
                    let command = pipe.cmd("HSET").arg(key.as_bytes());
                    for (field, value) in fields {
                        command.arg(field.as_bytes()).arg(value.as_bytes());
                    }
                    command.ignore();
                },
                KeyWrite::SortedSetAdd { key, members } => {
                    let command = pipe.cmd("ZADD").arg(key.as_bytes());
                    for ScoredMember { member, score } in members {
                        command.arg(*score).arg(member.as_bytes());
                    }
                    command.ignore();
                },
                KeyWrite::ExpireMillis { key, millis } => {
                    pipe.cmd("PEXPIRE").arg(key.as_bytes()).arg(*millis).ignore();
                },
            }
        }

        let mut conn = self.connection().await?;
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
