use crate::adapters::database::DbPool;
use crate::adapters::redis::RedisClient;
use crate::adapters::storage::ObjectStorage;
use crate::config::HealthConfig;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone, Debug)]
pub struct Metrics {
    pub status: Gauge<i64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            status: meter
                .i64_gauge("parley_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Readiness probes for the three external dependencies: Postgres, object
/// storage, and the pub/sub backbone. Each probe is bounded by its own
/// timeout so a hung dependency cannot stall the management endpoint.
#[derive(Clone, Debug)]
pub struct HealthService {
    pool: DbPool,
    storage: Arc<dyn ObjectStorage>,
    pubsub: Arc<RedisClient>,
    config: HealthConfig,
    metrics: Metrics,
}

impl HealthService {
    #[must_use]
    pub fn new(
        pool: DbPool,
        storage: Arc<dyn ObjectStorage>,
        pubsub: Arc<RedisClient>,
        config: HealthConfig,
    ) -> Self {
        Self { pool, storage, pubsub, config, metrics: Metrics::new() }
    }

    /// Checks database connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the database is unreachable.
    pub async fn check_db(&self) -> Result<(), String> {
        let db_timeout = Duration::from_millis(self.config.db_timeout_ms);

        match timeout(db_timeout, sqlx::query("SELECT 1").execute(&self.pool)).await {
            Ok(Ok(_)) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "database")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err(format!("Database connection failed: {e:?}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err("Database connection timed out".to_string())
            }
        }
    }

    /// Checks object storage connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if storage is unreachable.
    pub async fn check_storage(&self) -> Result<(), String> {
        let storage_timeout = Duration::from_millis(self.config.storage_timeout_ms);

        match timeout(storage_timeout, self.storage.check()).await {
            Ok(Ok(())) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "storage")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "storage")]);
                Err(format!("Storage connection failed: {e:?}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "storage")]);
                Err("Storage connection timed out".to_string())
            }
        }
    }

    /// Checks `PubSub` connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if `PubSub` is unreachable.
    pub async fn check_pubsub(&self) -> Result<(), String> {
        let pubsub_timeout = Duration::from_millis(self.config.pubsub_timeout_ms);

        match timeout(pubsub_timeout, self.pubsub.ping()).await {
            Ok(Ok(())) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "pubsub")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "pubsub")]);
                Err(format!("PubSub connection failed: {e:?}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "pubsub")]);
                Err("PubSub connection timed out".to_string())
            }
        }
    }
}
