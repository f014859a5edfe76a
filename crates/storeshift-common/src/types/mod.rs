//! Common types used across storeshift

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Kind of store taking part in a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Relational store (PostgreSQL)
    Postgres,
    /// Key-value store (Redis)
    Redis,
    /// Document store (MongoDB)
    Mongodb,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Postgres => "postgres",
            StoreKind::Redis => "redis",
            StoreKind::Mongodb => "mongodb",
        }
    }

    /// Name under which the backup checksum of this store is recorded
    pub fn backup_name(&self) -> String {
        format!("{}_backup", self.as_str())
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreKind {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "redis" => Ok(StoreKind::Redis),
            "mongodb" | "mongo" => Ok(StoreKind::Mongodb),
            _ => Err(CommonError::UnknownStoreKind(s.to_string())),
        }
    }
}

/// Which side of the migration a store sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreRole {
    Source,
    Target,
}

impl std::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreRole::Source => write!(f, "source"),
            StoreRole::Target => write!(f, "target"),
        }
    }
}
