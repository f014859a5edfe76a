//! Connectivity validation run before any data moves
//!
//! Every configured store is probed, including the optional document store.
//! All failures are collected so one run reports every unreachable store
//! instead of stopping at the first.

use async_trait::async_trait;
use futures::future::join_all;
use sqlx::{Connection, PgConnection};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

use crate::config::Endpoint;
use crate::error::{MigrationError, Result};
use crate::stores::run_tool;
use storeshift_common::{StoreKind, StoreRole};

/// A store that can be asked whether it is reachable
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    fn kind(&self) -> StoreKind;

    fn role(&self) -> StoreRole;

    /// Open a short-lived connection and run a trivial command
    async fn probe(&self) -> Result<()>;
}

/// Probe for a configured endpoint of any store kind
pub struct EndpointProbe {
    kind: StoreKind,
    role: StoreRole,
    endpoint: Endpoint,
    timeout: Duration,
}

impl EndpointProbe {
    pub fn new(kind: StoreKind, role: StoreRole, endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            kind,
            role,
            endpoint,
            timeout,
        }
    }

    fn unreachable(&self, message: impl Into<String>) -> MigrationError {
        MigrationError::Connectivity {
            kind: self.kind,
            role: self.role,
            message: format!("{} ({})", message.into(), self.endpoint.address()),
        }
    }

    async fn within_timeout<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result.map_err(|err| self.unreachable(err.to_string())),
            Err(_) => Err(self.unreachable(format!("timed out after {}s", self.timeout.as_secs()))),
        }
    }

    async fn probe_postgres(&self) -> Result<()> {
        let url = self.endpoint.postgres_url();
        self.within_timeout(async {
            let mut conn = PgConnection::connect(&url).await?;
            sqlx::query("SELECT 1").execute(&mut conn).await?;
            conn.close().await?;
            Ok::<_, MigrationError>(())
        })
        .await
    }

    async fn probe_redis(&self) -> Result<()> {
        let client = redis::Client::open(self.endpoint.redis_url())
            .map_err(|err| self.unreachable(err.to_string()))?;
        self.within_timeout(async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, MigrationError>(())
        })
        .await
    }

    async fn probe_mongodb(&self) -> Result<()> {
        let args = vec![
            "--quiet".to_string(),
            self.endpoint.mongo_uri(),
            "--eval".to_string(),
            "db.runCommand({ ping: 1 }).ok".to_string(),
        ];
        let output = self.within_timeout(run_tool("mongosh", &args)).await?;

        let reply = String::from_utf8_lossy(&output.stdout);
        if reply.trim() != "1" {
            return Err(self.unreachable(format!("unexpected ping reply '{}'", reply.trim())));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionProbe for EndpointProbe {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn role(&self) -> StoreRole {
        self.role
    }

    async fn probe(&self) -> Result<()> {
        match self.kind {
            StoreKind::Postgres => self.probe_postgres().await,
            StoreKind::Redis => self.probe_redis().await,
            StoreKind::Mongodb => self.probe_mongodb().await,
        }
    }
}

/// Probe every store; fails with the full list of unreachable stores
pub async fn validate_all(probes: &[Box<dyn ConnectionProbe>]) -> Result<()> {
    let results = join_all(probes.iter().map(|probe| async move {
        let outcome = probe.probe().await;
        (probe.kind(), probe.role(), outcome)
    }))
    .await;

    let mut failures = Vec::new();
    for (kind, role, outcome) in results {
        match outcome {
            Ok(()) => info!(store = %kind, role = %role, "Connection validated"),
            Err(err) => {
                error!(store = %kind, role = %role, error = %err, "Connection validation failed");
                failures.push(format!("{role} {kind}: {err}"));
            },
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(MigrationError::Unreachable(failures))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedProbe {
        kind: StoreKind,
        role: StoreRole,
        reachable: bool,
    }

    #[async_trait]
    impl ConnectionProbe for FixedProbe {
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

    fn probe(kind: StoreKind, role: StoreRole, reachable: bool) -> Box<dyn ConnectionProbe> {
        Box::new(FixedProbe {
            kind,
            role,
            reachable,
        })
    }

    #[tokio::test]
    async fn test_all_reachable() {
        let probes = vec![
            probe(StoreKind::Postgres, StoreRole::Source, true),
            probe(StoreKind::Redis, StoreRole::Target, true),
        ];
        validate_all(&probes).await.unwrap();
    }

    #[tokio::test]
    async fn test_every_failure_is_reported() {
        let probes = vec![
            probe(StoreKind::Postgres, StoreRole::Source, true),
            probe(StoreKind::Postgres, StoreRole::Target, false),
            probe(StoreKind::Mongodb, StoreRole::Source, false),
        ];

        match validate_all(&probes).await.unwrap_err() {
            MigrationError::Unreachable(failures) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("target postgres"));
                assert!(failures[1].starts_with("source mongodb"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let probe = EndpointProbe::new(
            StoreKind::Redis,
            StoreRole::Target,
            Endpoint::new("127.0.0.1", 1),
            Duration::from_secs(2),
        );
        let err = probe.probe().await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Connectivity {
                kind: StoreKind::Redis,
                role: StoreRole::Target,
                ..
            }
        ));
    }
}
