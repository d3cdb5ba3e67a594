use crate::protocol::ServerEvent;
use crate::services::chat_service::ChatService;
use crate::services::gateway::Metrics;
use crate::services::gateway::commands::CommandContext;
use crate::services::presence_service::PresenceService;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

pub(crate) struct Session {
    pub(crate) user_id: Uuid,
    pub(crate) connection_id: Uuid,
    pub(crate) request_id: String,
    pub(crate) socket: WebSocket,
    pub(crate) chat: ChatService,
    pub(crate) presence: PresenceService,
    pub(crate) user_events: broadcast::Receiver<ServerEvent>,
    pub(crate) presence_events: StreamMap<Uuid, BroadcastStream<ServerEvent>>,
    pub(crate) metrics: Metrics,
    pub(crate) shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            request_id = %self.request_id,
            otel.kind = "server"
        )
    )]
    pub(crate) async fn run(self) {
        // Destructuring allows independent mutable access to fields while
        // the socket is split into sink and stream halves.
        let Self {
            user_id,
            connection_id,
            socket,
            chat,
            presence,
            mut user_events,
            mut presence_events,
            metrics,
            mut shutdown_rx,
            ..
        } = self;

        metrics.active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        let commands = CommandContext::new(user_id, chat, presence.clone(), metrics.clone());
        let (mut ws_sink, mut ws_stream) = socket.split();

        loop {
            // Priority goes to shutdown and pushes so the server stays
            // responsive to control signals under inbound load.
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                result = user_events.recv() => {
                    let continue_loop = match result {
                        Ok(event) => send_event(&mut ws_sink, &metrics, &event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            metrics.lagged_total.add(missed, &[]);
                            tracing::warn!(missed, "Session fell behind its event channel");
                            true
                        }
                        Err(broadcast::error::RecvError::Closed) => false,
                    };
                    if !continue_loop { break; }
                }

                Some((partner_id, result)) = presence_events.next(), if !presence_events.is_empty() => {
                    let continue_loop = match result {
                        Ok(event) => send_event(&mut ws_sink, &metrics, &event).await,
                        Err(BroadcastStreamRecvError::Lagged(missed)) => {
                            metrics.lagged_total.add(missed, &[]);
                            tracing::warn!(missed, partner_id = %partner_id, "Presence stream lagged");
                            true
                        }
                    };
                    if !continue_loop { break; }
                }

                msg = ws_stream.next() => {
                    let continue_loop = match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            // One command, at most one ack. A failed command
                            // never tears the connection down.
                            match commands.handle_text(text.as_str()).await {
                                Some(ack) => send_event(&mut ws_sink, &metrics, &ack).await,
                                None => true,
                            }
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            tracing::warn!("Ignoring unexpected binary frame");
                            true
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => true,
                        Some(Ok(WsMessage::Close(_)) | Err(_)) | None => false,
                    };
                    if !continue_loop { break; }
                }
            }
        }

        if let Err(e) = presence.disconnect(user_id, connection_id).await {
            tracing::warn!(error = %e, "Failed to record presence on disconnect");
        }

        let _ = ws_sink.close().await;
        metrics.active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}

/// Serializes and writes one event. Returns `false` when the socket is
/// gone and the session should end.
async fn send_event(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    metrics: &Metrics,
    event: &ServerEvent,
) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            return true;
        }
    };

    if sink.send(WsMessage::Text(payload.into())).await.is_err() {
        return false;
    }
    metrics.events_pushed_total.add(1, &[]);
    true
}
