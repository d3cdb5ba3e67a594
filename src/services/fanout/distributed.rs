use crate::adapters::redis::{ChannelMessage, RedisClient};
use crate::config::FanoutConfig;
use crate::protocol::ServerEvent;
use crate::services::fanout::EventFanout;
use async_trait::async_trait;
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

/// Per-user direct event channel, one per recipient.
const USER_CHANNEL_PREFIX: &str = "user:";
/// Presence transition channel, one per watched user.
const PRESENCE_CHANNEL_PREFIX: &str = "presence:";

#[derive(Clone, Debug)]
struct Metrics {
    sends_total: Counter<u64>,
    received_total: Counter<u64>,
    unrouted_total: Counter<u64>,
    active_channels: UpDownCounter<i64>,
    gc_duration_seconds: Histogram<f64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            sends_total: meter
                .u64_counter("fanout_sends_total")
                .with_description("Total event publish attempts")
                .build(),
            received_total: meter
                .u64_counter("fanout_received_total")
                .with_description("Total events received from PubSub")
                .build(),
            unrouted_total: meter
                .u64_counter("fanout_unrouted_total")
                .with_description("Events received from PubSub with no local subscribers")
                .build(),
            active_channels: meter
                .i64_up_down_counter("fanout_active_channels")
                .with_description("Number of active local event channels")
                .build(),
            gc_duration_seconds: meter
                .f64_histogram("fanout_gc_duration_seconds")
                .with_description("Time taken to perform a single GC iteration")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("fanout_gc_reclaimed_total")
                .with_description("Total number of stale channels reclaimed by GC")
                .build(),
        }
    }
}

type ChannelMap = Arc<DashMap<Uuid, broadcast::Sender<ServerEvent>>>;

/// Fan-out backed by Redis Pub/Sub. Publishes loop back through the
/// dispatcher, so local and remote sessions share one delivery path.
#[derive(Debug)]
pub struct DistributedFanout {
    redis: Arc<RedisClient>,
    user_channels: ChannelMap,
    presence_channels: ChannelMap,
    user_channel_capacity: usize,
    metrics: Metrics,
}

impl DistributedFanout {
    /// Creates the fan-out and spawns its dispatcher and GC tasks.
    ///
    /// # Errors
    /// Returns an error if the subscription to `PubSub` fails.
    pub async fn new(
        redis: Arc<RedisClient>,
        config: &FanoutConfig,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let user_channels: ChannelMap = Arc::new(DashMap::new());
        let presence_channels: ChannelMap = Arc::new(DashMap::new());
        let metrics = Metrics::new();

        tokio::spawn(
            Self::run_gc(
                Arc::clone(&user_channels),
                Arc::clone(&presence_channels),
                metrics.clone(),
                config.gc_interval_secs,
                shutdown.clone(),
            )
            .instrument(tracing::info_span!("fanout_gc")),
        );

        let user_rx = redis.subscribe(&format!("{USER_CHANNEL_PREFIX}*")).await?;
        tokio::spawn(
            Self::run_dispatch(
                "user",
                USER_CHANNEL_PREFIX,
                user_rx,
                Arc::clone(&user_channels),
                metrics.clone(),
                shutdown.clone(),
            )
            .instrument(tracing::info_span!("fanout_dispatcher", scope = "user")),
        );

        let presence_rx = redis.subscribe(&format!("{PRESENCE_CHANNEL_PREFIX}*")).await?;
        tokio::spawn(
            Self::run_dispatch(
                "presence",
                PRESENCE_CHANNEL_PREFIX,
                presence_rx,
                Arc::clone(&presence_channels),
                metrics.clone(),
                shutdown,
            )
            .instrument(tracing::info_span!("fanout_dispatcher", scope = "presence")),
        );

        Ok(Self {
            redis,
            user_channels,
            presence_channels,
            user_channel_capacity: config.user_channel_capacity,
            metrics,
        })
    }

    async fn run_dispatch(
        scope: &'static str,
        prefix: &'static str,
        mut events: broadcast::Receiver<ChannelMessage>,
        channels: ChannelMap,
        metrics: Metrics,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = events.recv() => {
                    match result {
                        Ok(message) => {
                            let Some(user_id) = message
                                .channel
                                .strip_prefix(prefix)
                                .and_then(|raw| Uuid::parse_str(raw).ok())
                            else {
                                tracing::warn!(channel = %message.channel, "Event on unparseable channel");
                                continue;
                            };

                            let event: ServerEvent = match serde_json::from_str(&message.payload) {
                                Ok(event) => event,
                                Err(e) => {
                                    tracing::warn!(error = %e, channel = %message.channel, "Discarding undecodable event");
                                    continue;
                                }
                            };

                            metrics.received_total.add(1, &[KeyValue::new("scope", scope)]);

                            if let Some(tx) = channels.get(&user_id) {
                                let _ = tx.send(event);
                            } else {
                                metrics.unrouted_total.add(1, &[KeyValue::new("scope", scope)]);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, scope, "Fanout dispatcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn run_gc(
        user_channels: ChannelMap,
        presence_channels: ChannelMap,
        metrics: Metrics,
        interval_secs: u64,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let start = std::time::Instant::now();
                    let mut reclaimed_this_cycle = 0;

                    for channels in [&user_channels, &presence_channels] {
                        channels.retain(|_, sender| {
                            let active = sender.receiver_count() > 0;
                            if !active {
                                metrics.active_channels.add(-1, &[]);
                                reclaimed_this_cycle += 1;
                            }
                            active
                        });
                    }

                    let duration = start.elapsed().as_secs_f64();
                    metrics.gc_duration_seconds.record(duration, &[]);
                    if reclaimed_this_cycle > 0 {
                        metrics.gc_reclaimed_total.add(reclaimed_this_cycle, &[]);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    fn subscribe_local(&self, channels: &ChannelMap, user_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        let tx = channels
            .entry(user_id)
            .or_insert_with(|| {
                self.metrics.active_channels.add(1, &[]);
                let (tx, _rx) = broadcast::channel(self.user_channel_capacity);
                tx
            })
            .value()
            .clone();

        tx.subscribe()
    }

    async fn publish(&self, prefix: &str, user_id: Uuid, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode event");
                return;
            }
        };

        let channel = format!("{prefix}{user_id}");
        if let Err(e) = self.redis.publish(&channel, &payload).await {
            tracing::error!(error = %e, channel = %channel, "Failed to publish to PubSub");
            self.metrics.sends_total.add(1, &[KeyValue::new("status", "error")]);
        } else {
            self.metrics.sends_total.add(1, &[KeyValue::new("status", "sent")]);
        }
    }
}

#[async_trait]
impl EventFanout for DistributedFanout {
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn subscribe_user(&self, user_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.subscribe_local(&self.user_channels, user_id)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    async fn subscribe_presence(&self, user_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.subscribe_local(&self.presence_channels, user_id)
    }

    #[tracing::instrument(skip(self, event), fields(user_id = %user_id))]
    async fn push_to_user(&self, user_id: Uuid, event: ServerEvent) {
        self.publish(USER_CHANNEL_PREFIX, user_id, &event).await;
    }

    #[tracing::instrument(skip(self, event), fields(user_id = %user_id))]
    async fn publish_presence(&self, user_id: Uuid, event: ServerEvent) {
        self.publish(PRESENCE_CHANNEL_PREFIX, user_id, &event).await;
    }
}
