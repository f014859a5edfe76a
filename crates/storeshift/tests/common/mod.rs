//! In-memory store fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use storeshift::config::MigrationSettings;
use storeshift::error::{MigrationError, Result};
use storeshift::stores::{
    json_array, Blob, DocumentStore, KeyType, KeyValue, KeyValueStore, KeyWrite, RelationalStore, Row, ScoredMember,
    StorePair, StoreSet, TableRef,
};
use storeshift::validator::ConnectionProbe;
use storeshift_common::{StoreKind, StoreRole};

// ============================================================================
// Relational
// ============================================================================

/// Tables keyed by their `id` column
#[derive(Default)]
pub struct MemoryRelational {
    tables: Mutex<BTreeMap<TableRef, Vec<Row>>>,
    pub fetch_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
    fail_inserts: AtomicU32,
    phantom_rows: AtomicU64,
}

impl MemoryRelational {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: TableRef, rows: Vec<Row>) -> Self {
        self.tables.lock().unwrap().insert(table, rows);
        self
    }

    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// The next `count` inserts fail with a transient error
    pub fn fail_next_inserts(&self, count: u32) {
        self.fail_inserts.store(count, Ordering::SeqCst);
    }

    /// Make every count report `extra` more rows than stored
    pub fn add_phantom_rows(&self, extra: u64) {
        self.phantom_rows.store(extra, Ordering::SeqCst);
    }
}

fn row_id(row: &Row) -> i64 {
    row.to_value().unwrap()["id"].as_i64().unwrap_or_default()
}

#[async_trait]
impl RelationalStore for MemoryRelational {
    async fn list_tables(&self) -> Result<Vec<TableRef>> {
        Ok(self.tables.lock().unwrap().keys().cloned().collect())
    }

    async fn count_rows(&self, table: &TableRef) -> Result<u64> {
        let stored = self.rows(table).len() as u64;
        Ok(stored + self.phantom_rows.load(Ordering::SeqCst))
    }

    async fn fetch_batch(&self, table: &TableRef, offset: u64, limit: usize) -> Result<Vec<Row>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows(table);
        rows.sort_by_key(row_id);
        Ok(rows.into_iter().skip(offset as usize).take(limit).collect())
    }

    async fn insert_batch(&self, table: &TableRef, rows: &[Row]) -> Result<u64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let pending = self.fail_inserts.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_inserts.store(pending - 1, Ordering::SeqCst);
            return Err(MigrationError::transfer(table.to_string(), "connection reset by peer"));
        }

        let mut tables = self.tables.lock().unwrap();
        let stored = tables.entry(table.clone()).or_default();
        let mut inserted = 0;
        for row in rows {
            if !stored.iter().any(|existing| row_id(existing) == row_id(row)) {
                stored.push(row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn dump(&self, path: &Path) -> Result<()> {
        let mut dump = String::new();
        for (table, rows) in self.tables.lock().unwrap().iter() {
            dump.push_str(&format!("{table}\t{}\n", json_array(rows)));
        }
        write_new(path, dump.as_bytes())
    }
}

pub fn numbered_rows(count: i64) -> Vec<Row> {
    (1..=count)
        .map(|id| Row::from(json!({ "id": id, "name": format!("user-{id}") })))
        .collect()
}

// ============================================================================
// Key-value
// ============================================================================

#[derive(Default)]
pub struct MemoryKeyValue {
    entries: Mutex<BTreeMap<Blob, (KeyValue, Option<Instant>)>>,
    /// Keys whose type cannot be represented as a `KeyValue`
    foreign: Mutex<BTreeMap<Blob, String>>,
    pub apply_calls: AtomicUsize,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, value: KeyValue, ttl_secs: Option<u64>) {
        self.put_blob(Blob::from(key), value, ttl_secs.map(Duration::from_secs));
    }

    pub fn put_blob(&self, key: Blob, value: KeyValue, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().unwrap().insert(key, (value, deadline));
    }

    pub fn put_foreign(&self, key: &str, type_name: &str) {
        self.foreign
            .lock()
            .unwrap()
            .insert(Blob::from(key), type_name.to_string());
    }

    pub fn get(&self, key: impl Into<Blob>) -> Option<KeyValue> {
        self.entries
            .lock()
            .unwrap()
            .get(&key.into())
            .map(|(value, _)| value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

fn upsert_field(fields: &mut Vec<(Blob, Blob)>, field: &Blob, value: &Blob) {
    fields.retain(|(existing, _)| existing != field);
    fields.push((field.clone(), value.clone()));
    fields.sort();
}

#[async_trait]
impl KeyValueStore for MemoryKeyValue {
    async fn scan_keys(&self, _pattern: &str) -> Result<Vec<Blob>> {
        let mut keys: Vec<Blob> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.extend(self.foreign.lock().unwrap().keys().cloned());
        Ok(keys)
    }

    async fn key_type(&self, key: &Blob) -> Result<Option<KeyType>> {
        if let Some(type_name) = self.foreign.lock().unwrap().get(key) {
            return KeyType::from_type_name(key, type_name);
        }
        Ok(self.get(key.clone()).map(|value| value.key_type()))
    }

    async fn ttl_millis(&self, key: &Blob) -> Result<Option<u64>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).and_then(|(_, deadline)| {
            deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()).as_millis() as u64)
        }))
    }

    async fn read_value(&self, key: &Blob, _key_type: KeyType) -> Result<KeyValue> {
        self.get(key.clone())
            .ok_or_else(|| MigrationError::transfer(key.to_string(), "key vanished"))
    }

    async fn apply(&self, writes: &[KeyWrite]) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().unwrap();

        for write in writes {
            match write {
                KeyWrite::Delete { key } => {
                    entries.remove(key);
                },
                KeyWrite::Set { key, value } => {
                    entries.insert(key.clone(), (KeyValue::String(value.clone()), None));
                },
                KeyWrite::RightPush { key, items } => {
                    let entry = entries
                        .entry(key.clone())
                        .or_insert((KeyValue::List(Vec::new()), None));
                    if let KeyValue::List(ref mut list) = entry.0 {
                        list.extend(items.iter().cloned());
                    }
                },
                KeyWrite::SetAdd { key, members } => {
                    let entry = entries
                        .entry(key.clone())
                        .or_insert((KeyValue::Set(Vec::new()), None));
                    if let KeyValue::Set(ref mut set) = entry.0 {
                        set.extend(members.iter().cloned());
                        set.sort();
                        set.dedup();
                    }
                },
                KeyWrite::HashSet { key, fields } => {
                    let entry = entries
                        .entry(key.clone())
                        .or_insert((KeyValue::Hash(Vec::new()), None));
                    if let KeyValue::Hash(ref mut hash) = entry.0 {
                        for (field, value) in fields {
                            upsert_field(hash, field, value);
                        }
                    }
                },
                KeyWrite::SortedSetAdd { key, members } => {
                    let entry = entries
                        .entry(key.clone())
                        .or_insert((KeyValue::SortedSet(Vec::new()), None));
                    if let KeyValue::SortedSet(ref mut zset) = entry.0 {
                        for member in members {
                            zset.retain(|existing: &ScoredMember| existing.member != member.member);
                            zset.push(member.clone());
                        }
                        zset.sort_by(|a, b| a.score.total_cmp(&b.score));
                    }
                },
                KeyWrite::ExpireMillis { key, millis } => {
                    if let Some(entry) = entries.get_mut(key) {
                        entry.1 = Some(Instant::now() + Duration::from_millis(*millis));
                    }
                },
            }
        }
        Ok(())
    }
}

// ============================================================================
// Documents
// ============================================================================

const DOCUMENT_FILE: &str = "documents.json";

#[derive(Default)]
pub struct MemoryDocuments {
    documents: Mutex<Vec<Value>>,
}

impl MemoryDocuments {
    pub fn with_documents(documents: Vec<Value>) -> Self {
        Self {
            documents: Mutex::new(documents),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn export_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec(&*self.documents.lock().unwrap())?;
        std::fs::write(dir.join(DOCUMENT_FILE), bytes)?;
        Ok(())
    }

    async fn import_from(&self, dir: &Path) -> Result<u64> {
        let bytes = std::fs::read(dir.join(DOCUMENT_FILE))?;
        let documents: Vec<Value> = serde_json::from_slice(&bytes)?;
        let count = documents.len() as u64;
        *self.documents.lock().unwrap() = documents;
        Ok(count)
    }
}

// ============================================================================
// Probes and wiring
// ============================================================================

pub struct StaticProbe {
    pub kind: StoreKind,
    pub role: StoreRole,
    pub reachable: bool,
}

#[async_trait]
impl ConnectionProbe for StaticProbe {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn role(&self) -> StoreRole {
        self.role
    }

    async fn probe(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(MigrationError::Connectivity {
                kind: self.kind,
                role: self.role,
                message: "connection refused".to_string(),
            })
        }
    }
}

pub fn reachable_probes() -> Vec<Box<dyn ConnectionProbe>> {
    let mut probes: Vec<Box<dyn ConnectionProbe>> = Vec::new();
    for kind in [StoreKind::Postgres, StoreKind::Redis] {
        for role in [StoreRole::Source, StoreRole::Target] {
            probes.push(Box::new(StaticProbe {
                kind,
                role,
                reachable: true,
            }));
        }
    }
    probes
}

/// Fakes for every store, kept as concrete handles for assertions
pub struct Fixture {
    pub pg_source: Arc<MemoryRelational>,
    pub pg_target: Arc<MemoryRelational>,
    pub kv_source: Arc<MemoryKeyValue>,
    pub kv_target: Arc<MemoryKeyValue>,
    pub documents: Option<(Arc<MemoryDocuments>, Arc<MemoryDocuments>)>,
}

impl Fixture {
    pub fn new(pg_source: MemoryRelational, kv_source: MemoryKeyValue) -> Self {
        Self {
            pg_source: Arc::new(pg_source),
            pg_target: Arc::new(MemoryRelational::new()),
            kv_source: Arc::new(kv_source),
            kv_target: Arc::new(MemoryKeyValue::new()),
            documents: None,
        }
    }

    pub fn with_documents(mut self, source: MemoryDocuments) -> Self {
        self.documents = Some((Arc::new(source), Arc::new(MemoryDocuments::default())));
        self
    }

    pub fn relational(&self) -> StorePair<dyn RelationalStore> {
        StorePair::new(
            self.pg_source.clone() as Arc<dyn RelationalStore>,
            self.pg_target.clone() as Arc<dyn RelationalStore>,
        )
    }

    pub fn key_value(&self) -> StorePair<dyn KeyValueStore> {
        StorePair::new(
            self.kv_source.clone() as Arc<dyn KeyValueStore>,
            self.kv_target.clone() as Arc<dyn KeyValueStore>,
        )
    }

    pub fn store_set(&self, probes: Vec<Box<dyn ConnectionProbe>>) -> StoreSet {
        StoreSet {
            relational: self.relational(),
            key_value: self.key_value(),
            documents: self.documents.as_ref().map(|(source, target)| {
                StorePair::new(
                    source.clone() as Arc<dyn DocumentStore>,
                    target.clone() as Arc<dyn DocumentStore>,
                )
            }),
            probes,
        }
    }
}

pub fn settings_in(dir: &Path) -> MigrationSettings {
    MigrationSettings {
        backoff_ms: 1,
        max_backoff_ms: 5,
        backup_dir: dir.join("backups"),
        logs_dir: dir.join("logs"),
        ..MigrationSettings::default()
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    Ok(())
}
