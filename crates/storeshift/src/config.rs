//! Configuration management
//!
//! Connection endpoints for every store and role plus migration tuning,
//! read from the environment (optionally seeded by a `.env` file).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;

// ============================================================================
// Defaults
// ============================================================================

/// Default host for every store.
pub const DEFAULT_HOST: &str = "localhost";

/// Default PostgreSQL port.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Default PostgreSQL user and database.
pub const DEFAULT_POSTGRES_USER: &str = "postgres";
pub const DEFAULT_POSTGRES_DATABASE: &str = "postgres";

/// Default Redis port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default MongoDB port.
pub const DEFAULT_MONGO_PORT: u16 = 27017;

/// Rows per relational batch.
pub const DEFAULT_POSTGRES_BATCH_SIZE: usize = 1000;

/// Keys per key-value batch.
pub const DEFAULT_REDIS_BATCH_SIZE: usize = 100;

/// Units (tables, key batches) transferred at once. 1 keeps the run sequential.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Attempts per batch before a phase fails.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// First retry delay and ceiling, in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;

/// Connection timeout for every store, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Where backup artifacts and reports go.
pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_LOGS_DIR: &str = "./logs";

/// Connection descriptor for one store on one side of the migration
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Database name (PostgreSQL, MongoDB) or numeric index (Redis)
    pub database: Option<String>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            database: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// `user:password@` with both parts percent-encoded, or empty
    fn userinfo(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(password)
            ),
            (Some(user), None) => format!("{}@", urlencoding::encode(user)),
            (None, Some(password)) => format!(":{}@", urlencoding::encode(password)),
            (None, None) => String::new(),
        }
    }

    pub fn postgres_url(&self) -> String {
        format!(
            "postgresql://{}{}:{}/{}",
            self.userinfo(),
            self.host,
            self.port,
            self.database.as_deref().unwrap_or(DEFAULT_POSTGRES_DATABASE)
        )
    }

    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}{}:{}/{}",
            self.userinfo(),
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("0")
        )
    }

    pub fn mongo_uri(&self) -> String {
        let auth_source = if self.username.is_some() {
            "?authSource=admin"
        } else {
            ""
        };
        format!(
            "mongodb://{}{}:{}/{}",
            self.userinfo(),
            self.host,
            self.port,
            auth_source
        )
    }

    /// Host and port only, safe to log
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Every store endpoint for one side of the migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub postgres: Endpoint,
    pub redis: Endpoint,
    /// The document phase only runs when the source deployment has one
    pub mongodb: Option<Endpoint>,
}

/// Tuning for a migration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    pub postgres_batch_size: usize,
    pub redis_batch_size: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub backup_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            postgres_batch_size: DEFAULT_POSTGRES_BATCH_SIZE,
            redis_batch_size: DEFAULT_REDIS_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
        }
    }
}

impl MigrationSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Full configuration for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: Deployment,
    pub target: Deployment,
    pub migration: MigrationSettings,
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from the environment without validating it
    pub fn from_env() -> Result<Self> {
        let defaults = MigrationSettings::default();

        let migration = MigrationSettings {
            postgres_batch_size: env_parse("MIGRATION_PG_BATCH_SIZE", defaults.postgres_batch_size)?,
            redis_batch_size: env_parse("MIGRATION_REDIS_BATCH_SIZE", defaults.redis_batch_size)?,
            concurrency: env_parse("MIGRATION_CONCURRENCY", defaults.concurrency)?,
            max_attempts: env_parse("MIGRATION_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_ms: env_parse("MIGRATION_BACKOFF_MS", defaults.backoff_ms)?,
            max_backoff_ms: env_parse("MIGRATION_MAX_BACKOFF_MS", defaults.max_backoff_ms)?,
            connect_timeout_secs: env_parse(
                "MIGRATION_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            )?,
            backup_dir: std::env::var("MIGRATION_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
            logs_dir: std::env::var("MIGRATION_LOGS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.logs_dir),
        };

        Ok(Self {
            source: deployment_from_env("SOURCE")?,
            target: deployment_from_env("TARGET")?,
            migration,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let settings = &self.migration;

        if settings.postgres_batch_size == 0 || settings.redis_batch_size == 0 {
            return Err(MigrationError::config("batch sizes must be greater than 0"));
        }

        if settings.concurrency == 0 {
            return Err(MigrationError::config("concurrency must be greater than 0"));
        }

        if settings.max_attempts == 0 {
            return Err(MigrationError::config("max attempts must be at least 1"));
        }

        if settings.backoff_ms > settings.max_backoff_ms {
            return Err(MigrationError::config(format!(
                "backoff ({} ms) cannot exceed max backoff ({} ms)",
                settings.backoff_ms, settings.max_backoff_ms
            )));
        }

        for (label, endpoint) in self.endpoints() {
            if endpoint.host.trim().is_empty() {
                return Err(MigrationError::config(format!("{label} host cannot be empty")));
            }
            if endpoint.port == 0 {
                return Err(MigrationError::config(format!("{label} port must be greater than 0")));
            }
        }

        match (&self.source.mongodb, &self.target.mongodb) {
            (Some(_), None) => Err(MigrationError::config(
                "SOURCE_MONGO_HOST is set but TARGET_MONGO_HOST is not",
            )),
            (None, Some(_)) => {
                tracing::warn!("TARGET_MONGO_HOST is set without a source; document phase will not run");
                Ok(())
            },
            _ => Ok(()),
        }
    }

    /// Whether the document phase should run
    pub fn documents_configured(&self) -> bool {
        self.source.mongodb.is_some() && self.target.mongodb.is_some()
    }

    fn endpoints(&self) -> Vec<(&'static str, &Endpoint)> {
        let mut endpoints = vec![
            ("source postgres", &self.source.postgres),
            ("target postgres", &self.target.postgres),
            ("source redis", &self.source.redis),
            ("target redis", &self.target.redis),
        ];
        if let Some(ref mongo) = self.source.mongodb {
            endpoints.push(("source mongodb", mongo));
        }
        if let Some(ref mongo) = self.target.mongodb {
            endpoints.push(("target mongodb", mongo));
        }
        endpoints
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match env_string(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| MigrationError::config(format!("{name} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

fn deployment_from_env(prefix: &str) -> Result<Deployment> {
    let postgres = Endpoint {
        host: env_string(&format!("{prefix}_PG_HOST")).unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env_parse(&format!("{prefix}_PG_PORT"), DEFAULT_POSTGRES_PORT)?,
        username: Some(
            env_string(&format!("{prefix}_PG_USER"))
                .unwrap_or_else(|| DEFAULT_POSTGRES_USER.to_string()),
        ),
        password: env_string(&format!("{prefix}_PG_PASSWORD")),
        database: Some(
            env_string(&format!("{prefix}_PG_DATABASE"))
                .unwrap_or_else(|| DEFAULT_POSTGRES_DATABASE.to_string()),
        ),
    };

    let redis = Endpoint {
        host: env_string(&format!("{prefix}_REDIS_HOST")).unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env_parse(&format!("{prefix}_REDIS_PORT"), DEFAULT_REDIS_PORT)?,
        username: env_string(&format!("{prefix}_REDIS_USER")),
        password: env_string(&format!("{prefix}_REDIS_PASSWORD")),
        database: Some(env_parse::<u32>(&format!("{prefix}_REDIS_DB"), 0)?.to_string()),
    };

    let mongodb = match env_string(&format!("{prefix}_MONGO_HOST")) {
        Some(host) => Some(Endpoint {
            host,
            port: env_parse(&format!("{prefix}_MONGO_PORT"), DEFAULT_MONGO_PORT)?,
            username: env_string(&format!("{prefix}_MONGO_USER")),
            password: env_string(&format!("{prefix}_MONGO_PASSWORD")),
            database: env_string(&format!("{prefix}_MONGO_DATABASE")),
        }),
        None => None,
    };

    Ok(Deployment {
        postgres,
        redis,
        mongodb,
    })
}
