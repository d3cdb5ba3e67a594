#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod services;
pub mod stores;
pub mod telemetry;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapters::database::DbPool;
use crate::adapters::redis::{RedisClient, RedisPresenceStore, RedisTypingStore};
use crate::adapters::storage::{ObjectStorage, S3Storage};
use crate::api::ServiceContainer;
use crate::config::{Config, S3Config};
use crate::domain::codec::MessageCodec;
use crate::services::attachment_service::{AttachmentService, MediaProcessor, PassthroughProcessor};
use crate::services::chat_service::ChatService;
use crate::services::directory::ConversationDirectory;
use crate::services::fanout::{DistributedFanout, EventFanout};
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_store::MessageStore;
use crate::services::presence_service::PresenceService;
use crate::services::rate_limit_service::RateLimitService;
use crate::stores::{ConversationStore, DeliveryStore, PayloadStore, PresenceStore, TypingStore};
use crate::workers::PayloadSweepWorker;

/// Routes panics through tracing so they show up in the telemetry pipeline
/// instead of only on stderr.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "Panic");
        default_hook(info);
    }));
}

/// Applies any pending database migrations.
///
/// # Errors
/// Returns an error if a migration fails to apply.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Spawns a task that flips the shutdown flag on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
        }

        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

/// Builds the S3 client from configuration, honoring custom endpoints and
/// static credentials for S3-compatible stores such as MinIO.
pub async fn initialize_s3_client(config: &S3Config) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));

    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(aws_credential_types::Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "config",
        ));
    }

    let sdk_config = loader.load().await;
    let builder =
        aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.force_path_style);
    aws_sdk_s3::Client::from_conf(builder.build())
}

/// The fully wired application: request-facing services, the health probe
/// service for the management port, and the background workers.
#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
    pub workers: Workers,
}

/// Background loops that run for the life of the process.
#[derive(Debug)]
pub struct Workers {
    payload_sweep: PayloadSweepWorker,
}

impl Workers {
    /// Spawns every worker onto the runtime and returns their handles so
    /// shutdown can wait for them.
    #[must_use]
    pub fn spawn_all(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![tokio::spawn(self.payload_sweep.run(shutdown_rx))]
    }
}

/// Wires infrastructure handles into the service graph. Construction is
/// separated from resource acquisition so tests can inject fakes.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    pool: Option<DbPool>,
    pubsub: Option<Arc<RedisClient>>,
    s3_client: Option<aws_sdk_s3::Client>,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, pool: None, pubsub: None, s3_client: None, shutdown_rx: None }
    }

    #[must_use]
    pub fn with_database(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_pubsub(mut self, pubsub: Arc<RedisClient>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    #[must_use]
    pub fn with_s3(mut self, client: aws_sdk_s3::Client) -> Self {
        self.s3_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_shutdown_rx(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Builds the service graph.
    ///
    /// # Errors
    /// Returns an error if a required resource is missing, the message key
    /// is malformed, or the fan-out subscription cannot be established.
    pub async fn build(self) -> anyhow::Result<App> {
        let pool = self.pool.context("database pool not configured")?;
        let pubsub = self.pubsub.context("pub/sub client not configured")?;
        let s3_client = self.s3_client.context("S3 client not configured")?;
        let shutdown_rx = self.shutdown_rx.context("shutdown receiver not configured")?;

        let storage: Arc<dyn ObjectStorage> =
            Arc::new(S3Storage::new(s3_client, &self.config.storage));

        let conversations: Arc<dyn ConversationStore> =
            Arc::new(adapters::database::PgConversationStore::new(pool.clone()));
        let payloads: Arc<dyn PayloadStore> =
            Arc::new(adapters::database::PgPayloadStore::new(pool.clone()));
        let deliveries: Arc<dyn DeliveryStore> =
            Arc::new(adapters::database::PgDeliveryStore::new(pool.clone()));
        let presence: Arc<dyn PresenceStore> =
            Arc::new(RedisPresenceStore::new(Arc::clone(&pubsub)));
        let typing: Arc<dyn TypingStore> = Arc::new(RedisTypingStore::new(Arc::clone(&pubsub)));

        let codec = MessageCodec::from_hex(&self.config.chat.message_key)
            .context("invalid message encryption key")?;

        let fanout: Arc<dyn EventFanout> = Arc::new(
            DistributedFanout::new(Arc::clone(&pubsub), &self.config.fanout, shutdown_rx.clone())
                .await?,
        );

        let directory = ConversationDirectory::new(conversations);
        let message_store = MessageStore::new(payloads, deliveries);

        let chat_service =
            ChatService::new(directory, message_store.clone(), codec, Arc::clone(&fanout));
        let presence_service = PresenceService::new(
            presence,
            typing,
            Arc::clone(&fanout),
            Duration::from_secs(self.config.presence.presence_ttl_secs),
            Duration::from_secs(self.config.presence.typing_ttl_secs),
        );
        let gateway_service =
            GatewayService::new(chat_service.clone(), presence_service, Arc::clone(&fanout));

        let processor: Arc<dyn MediaProcessor> =
            Arc::new(PassthroughProcessor::new(self.config.storage.attachment_max_size_bytes));
        let attachment_service = AttachmentService::new(Arc::clone(&storage), processor);

        let rate_limit_service =
            RateLimitService::new(self.config.server.trusted_proxies.clone());

        let health_service = HealthService::new(
            pool,
            Arc::clone(&storage),
            Arc::clone(&pubsub),
            self.config.health.clone(),
        );

        let workers = Workers {
            payload_sweep: PayloadSweepWorker::new(message_store, self.config.sweep.clone()),
        };

        Ok(App {
            services: ServiceContainer {
                chat_service,
                attachment_service,
                gateway_service,
                rate_limit_service,
            },
            health_service,
            workers,
        })
    }
}
