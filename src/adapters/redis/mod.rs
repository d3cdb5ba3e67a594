use crate::config::PubSubConfig;
use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

pub mod ephemeral;

pub use ephemeral::{RedisPresenceStore, RedisTypingStore};

/// A message received off a pub/sub pattern. Payloads on our channels are
/// always JSON-encoded server events.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug)]
pub struct RedisClient {
    publisher: redis::aio::ConnectionManager,
    // Maps patterns (e.g. "user:*") to broadcast senders
    patterns: Arc<DashMap<String, broadcast::Sender<ChannelMessage>>>,
    client: redis::Client,
    shutdown: watch::Receiver<bool>,
    channel_capacity: usize,
    config: PubSubConfig,
}

impl RedisClient {
    /// Creates the shared Redis handle used for key-value commands and
    /// pub/sub fan-in.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn new(
        config: &PubSubConfig,
        channel_capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Arc<Self>> {
        let client = redis::Client::open(config.url.as_str())?;
        let publisher = client.get_connection_manager().await?;
        let patterns = Arc::new(DashMap::new());

        Ok(Arc::new(Self { publisher, patterns, client, shutdown, channel_capacity, config: config.clone() }))
    }

    /// Returns a connection usable for standard Redis commands.
    #[must_use]
    pub fn publisher(&self) -> redis::aio::ConnectionManager {
        self.publisher.clone()
    }

    /// Publishes a payload to a channel. Delivery is fire-and-forget;
    /// subscribers on other nodes pick it up through their pattern streams.
    ///
    /// # Errors
    /// Returns an error if the publish command fails.
    pub async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        let mut conn = self.publisher();
        let _: () = redis::AsyncCommands::publish(&mut conn, channel, payload).await?;
        Ok(())
    }

    /// Subscribes to a Redis pattern, starting a background listener for it
    /// if one is not already running.
    ///
    /// # Errors
    /// Returns an error if the subscription fails.
    pub async fn subscribe(&self, pattern: &str) -> anyhow::Result<broadcast::Receiver<ChannelMessage>> {
        if let Some(tx) = self.patterns.get(pattern) {
            return Ok(tx.subscribe());
        }

        let (tx, rx) = broadcast::channel(self.channel_capacity);
        self.patterns.insert(pattern.to_string(), tx.clone());

        let pattern_str = pattern.to_string();
        let client = self.client.clone();
        let shutdown = self.shutdown.clone();
        let patterns = Arc::clone(&self.patterns);
        let config = self.config.clone();

        // Used to wait for the first successful psubscribe
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(
            async move {
                Self::run_pattern_listener(client, pattern_str, tx, shutdown, patterns, config, ready_tx).await;
            }
            .instrument(tracing::debug_span!("pubsub_listener", pattern = %pattern)),
        );

        let _ = ready_rx.await;

        Ok(rx)
    }

    async fn run_pattern_listener(
        client: redis::Client,
        pattern: String,
        tx: broadcast::Sender<ChannelMessage>,
        mut shutdown: watch::Receiver<bool>,
        patterns: Arc<DashMap<String, broadcast::Sender<ChannelMessage>>>,
        config: PubSubConfig,
        ready_tx: tokio::sync::oneshot::Sender<()>,
    ) {
        let retry_strategy = ExponentialBuilder::default()
            .with_min_delay(std::time::Duration::from_secs(config.min_backoff_secs))
            .with_max_delay(std::time::Duration::from_secs(config.max_backoff_secs));

        let mut ready_tx = Some(ready_tx);

        loop {
            let pubsub_result = (|| async {
                let mut pubsub = client.get_async_pubsub().await?;
                pubsub.psubscribe(&pattern).await?;
                Ok::<redis::aio::PubSub, redis::RedisError>(pubsub)
            })
            .retry(&retry_strategy)
            .when(|e| {
                tracing::warn!(error = %e, "Failed to subscribe to pubsub, retrying...");
                true
            })
            .notify(|e, duration| {
                tracing::debug!("Pubsub subscription retry in {:?} due to error: {:?}", duration, e);
            })
            .await;

            let pubsub: redis::aio::PubSub = match pubsub_result {
                Ok(ps) => ps,
                Err(e) => {
                    tracing::error!(error = %e, "Pubsub subscription failed after retries");
                    break;
                }
            };

            tracing::info!(pattern = %pattern, "Subscribed to pubsub");
            if let Some(rtx) = ready_tx.take() {
                let _ = rtx.send(());
            }

            let mut message_stream = pubsub.into_on_message();

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    msg = message_stream.next() => {
                        if let Some(msg) = msg {
                            let channel = msg.get_channel_name().to_string();
                            let payload: String = msg.get_payload().unwrap_or_default();
                            // A send error only means no local receiver right
                            // now; the listener stays up for the next one.
                            let _ = tx.send(ChannelMessage { channel, payload });
                        } else {
                            tracing::warn!(pattern = %pattern, "Pubsub connection lost, reconnecting...");
                            break;
                        }
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        patterns.remove(&pattern);
    }

    /// Pings the Redis server to check connectivity.
    ///
    /// # Errors
    /// Returns an error if the ping fails.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.publisher();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
