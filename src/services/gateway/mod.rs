pub(crate) mod commands;
pub(crate) mod session;

use crate::services::chat_service::ChatService;
use crate::services::fanout::EventFanout;
use crate::services::gateway::session::Session;
use crate::services::presence_service::PresenceService;
use axum::extract::ws::WebSocket;
use opentelemetry::{
    global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) active_connections: UpDownCounter<i64>,
    pub(crate) commands_total: Counter<u64>,
    pub(crate) events_pushed_total: Counter<u64>,
    pub(crate) lagged_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            active_connections: meter
                .i64_up_down_counter("websocket_active_connections")
                .with_description("Number of active WebSocket connections")
                .build(),
            commands_total: meter
                .u64_counter("websocket_commands_total")
                .with_description("Client commands processed, by command and outcome")
                .build(),
            events_pushed_total: meter
                .u64_counter("websocket_events_pushed_total")
                .with_description("Server events written to sockets")
                .build(),
            lagged_total: meter
                .u64_counter("websocket_lagged_total")
                .with_description("Events lost to slow sessions falling behind their channel")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts authenticated sockets and runs one [`Session`] per connection.
/// Joining means subscribing to the user's own event channel and to the
/// presence of everyone they share a conversation with.
#[derive(Clone, Debug)]
pub struct GatewayService {
    chat: ChatService,
    presence: PresenceService,
    fanout: Arc<dyn EventFanout>,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        chat: ChatService,
        presence: PresenceService,
        fanout: Arc<dyn EventFanout>,
    ) -> Self {
        Self { chat, presence, fanout, metrics: Metrics::new() }
    }

    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        user_id: Uuid,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let connection_id = Uuid::new_v4();

        // Subscribe before announcing the connection so no push can slip
        // through between joining and listening.
        let user_events = self.fanout.subscribe_user(user_id).await;

        let mut presence_events = StreamMap::new();
        match self.chat.partner_ids(user_id).await {
            Ok(partner_ids) => {
                for partner_id in partner_ids {
                    let rx = self.fanout.subscribe_presence(partner_id).await;
                    presence_events.insert(partner_id, BroadcastStream::new(rx));
                }
            }
            Err(e) => {
                // The session still works, it just sees no partner presence
                // until the client reconnects.
                tracing::warn!(error = %e, "Failed to load partners for presence interest");
            }
        }

        if let Err(e) = self.presence.connect(user_id, connection_id).await {
            tracing::warn!(error = %e, "Failed to record presence on connect");
        }

        let session = Session {
            user_id,
            connection_id,
            request_id,
            socket,
            chat: self.chat.clone(),
            presence: self.presence.clone(),
            user_events,
            presence_events,
            metrics: self.metrics.clone(),
            shutdown_rx,
        };

        session.run().await;
    }
}
