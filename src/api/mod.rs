use crate::config::Config;
use crate::services::attachment_service::AttachmentService;
use crate::services::chat_service::ChatService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::rate_limit_service::RateLimitService;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::{
    Router,
    middleware::{Next, from_fn_with_state},
    routing::{delete, get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod attachments;
pub mod chat;
pub mod gateway;
pub mod health;
pub mod middleware;
pub mod schemas;

// Multipart framing on top of the payload itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub chat_service: ChatService,
    pub attachment_service: AttachmentService,
    pub gateway_service: GatewayService,
    pub rate_limit_service: RateLimitService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

#[derive(Debug)]
pub struct ServiceContainer {
    pub chat_service: ChatService,
    pub attachment_service: AttachmentService,
    pub gateway_service: GatewayService,
    pub rate_limit_service: RateLimitService,
}

async fn log_rate_limit_events(
    axum::extract::State(state): axum::extract::State<AppState>,
    req: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let response = next.run(req).await;

    let retry_after = response
        .headers()
        .get("x-ratelimit-after")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    state.rate_limit_service.log_decision(response.status(), retry_after);

    response
}

/// Configures and returns the primary application router.
///
/// # Panics
/// Panics if the rate limiter configuration cannot be constructed.
pub fn app_router(
    config: Config,
    services: ServiceContainer,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Router {
    let interval_ns = 1_000_000_000 / config.rate_limit.per_second.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_nanosecond(u64::from(interval_ns))
            .burst_size(config.rate_limit.burst)
            .key_extractor(services.rate_limit_service.extractor.clone())
            .finish()
            .expect("Failed to build rate limiter config"),
    );

    let body_limit = config.storage.attachment_max_size_bytes + MULTIPART_OVERHEAD_BYTES;
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    let state = AppState {
        config,
        chat_service: services.chat_service,
        attachment_service: services.attachment_service,
        gateway_service: services.gateway_service,
        rate_limit_service: services.rate_limit_service,
        shutdown_rx,
    };

    let api_routes = Router::new()
        .route("/messages", post(chat::send_message))
        .route("/messages/read", post(chat::mark_read))
        .route("/messages/{id}", delete(chat::delete_message))
        .route("/conversations", get(chat::list_conversations))
        .route("/conversations/{id}/messages", get(chat::conversation_messages))
        .route("/conversations/{id}/block", post(chat::block_conversation))
        .route("/conversations/{id}/unblock", post(chat::unblock_conversation))
        .route("/conversations/{id}/unread", get(chat::unread_count))
        .route(
            "/attachments",
            post(attachments::upload_attachment).layer(DefaultBodyLimit::max(body_limit)),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .layer(GovernorLayer::new(governor_conf.clone()));

    // The gateway upgrade lives outside /v1 and skips the request timeout;
    // sessions outlive any HTTP deadline.
    let ws_route = Router::new()
        .route("/ws", get(gateway::websocket_handler))
        .layer(GovernorLayer::new(governor_conf));

    Router::new()
        .nest("/v1", api_routes)
        .merge(ws_route)
        .layer(from_fn_with_state(state.clone(), log_rate_limit_events))
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                        "user_id" = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                        let status = response.status();
                        tracing::Span::current().record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            middleware::MakeRequestUuidOrHeader,
        ))
        .with_state(state)
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
