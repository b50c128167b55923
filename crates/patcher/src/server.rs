//! HTTP server hosting the plugin.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

use crate::dispatcher::Dispatcher;
use crate::webhooks::validate_webhook;
use crate::PLUGIN_NAME;

/// Body of every accepted webhook response.
pub const ACK: &str = "Event received. Have a nice day.";

const PLUGIN_DESCRIPTION: &str = "The patch-propagator plugin is used for carrying over \
     patchset from previous development stream to newly created one.";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Shared secret GitHub signs deliveries with.
    pub hmac_secret: Arc<[u8]>,
}

impl AppState {
    #[must_use]
    pub fn new(dispatcher: Dispatcher, hmac_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            hmac_secret: Arc::from(hmac_secret.into()),
        }
    }
}

/// Build the HTTP router for the plugin.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(handle_webhook))
        .route("/hook", any(handle_webhook))
        .route("/help", get(plugin_help))
        .route("/healthz", get(health_check))
        .route("/healthz/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .with_state(state)
}

/// Validate a GitHub delivery, acknowledge it, and dispatch it in the background.
///
/// The acknowledgement does not wait for job creation; GitHub only needs to
/// know the delivery arrived.
async fn handle_webhook(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = match validate_webhook(&method, &headers, &body, &state.hmac_secret) {
        Ok(delivery) => delivery,
        Err(rejection) => {
            warn!(status = %rejection.status, reason = %rejection.message, "Rejected webhook");
            return (rejection.status, rejection.message).into_response();
        }
    };

    info!(
        event_type = %delivery.event_kind,
        event_guid = %delivery.event_guid,
        "received {}",
        delivery.event_kind
    );

    let dispatcher = Arc::clone(&state.dispatcher);
    tokio::spawn(async move {
        if let Err(e) = dispatcher
            .handle(&delivery.event_kind, &delivery.event_guid, &body)
            .await
        {
            error!(
                event_guid = %delivery.event_guid,
                error = %e,
                "Error parsing event."
            );
        }
    });

    (StatusCode::OK, ACK).into_response()
}

/// Plugin help, in the shape Prow's hook aggregates from external plugins.
async fn plugin_help() -> Json<Value> {
    Json(json!({
        "name": PLUGIN_NAME,
        "description": PLUGIN_DESCRIPTION,
        "events": ["repository"],
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": PLUGIN_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}
