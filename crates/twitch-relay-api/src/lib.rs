//! # Twitch Relay HTTP Service
//!
//! HTTP and WebSocket surfaces of the relay.
//!
//! This crate provides:
//! - The EventSub callback endpoint with signature verification
//! - The `/login` OAuth endpoint
//! - An optional Prometheus `/metrics` endpoint
//! - The subscriber WebSocket listener ([`gateway`])

pub mod config;
pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod tls;

pub use config::{
    OAuthConfig, ServerConfig, ServiceConfig, SubscriberConfig, TlsConfig, WebhookConfig,
};
pub use errors::{ConfigError, LoginError, ServiceError, TlsError, WebhookHandlerError};
pub use gateway::{create_gateway_router, start_subscriber_server, GatewayState};
pub use metrics::RelayMetrics;

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::{collections::HashMap, future::Future, sync::Arc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use twitch_relay_core::{
    dispatcher::FanoutDispatcher,
    identity::IdentityProvider,
    registry::ConnectionRegistry,
    webhook::{EventSubProcessor, WebhookError, WebhookHeaders, WebhookOutcome, WebhookRequest},
};

/// Body of the 405 reply on the webhook path.
pub const METHOD_NOT_ALLOWED_BODY: &str = "What are you doing?";

/// Body of the 404 reply.
pub const NOT_FOUND_BODY: &str = "Not Found";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Verifies, classifies and dispatches EventSub deliveries
    pub processor: Arc<EventSubProcessor>,

    /// Authenticated subscribers
    pub registry: Arc<ConnectionRegistry>,

    /// OAuth identity service used by `/login`
    pub identity: Arc<dyn IdentityProvider>,

    /// Metrics collector for observability
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        dispatcher: Arc<FanoutDispatcher>,
        identity: Arc<dyn IdentityProvider>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let processor = Arc::new(EventSubProcessor::new(
            config.webhooks.secret.clone(),
            Arc::clone(&dispatcher),
        ));

        Self {
            config: Arc::new(config),
            processor,
            registry: Arc::clone(dispatcher.registry()),
            identity,
            metrics,
        }
    }

    /// State for the subscriber listener sharing this registry and metrics.
    pub fn gateway_state(&self) -> GatewayState {
        GatewayState {
            registry: Arc::clone(&self.registry),
            password: self.config.subscribers.password.clone(),
            outbound_capacity: self.config.subscribers.outbound_capacity,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(
            &state.config.webhooks.endpoint_path,
            post(handle_webhook).fallback(method_not_allowed),
        )
        .route("/login", get(handle_login));

    if state.config.server.enable_metrics {
        router = router.route("/metrics", get(metrics_endpoint));
    }

    router
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(state.config.server.max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(
                    |request: &axum::extract::Request| {
                        // Paths only: `/login` query strings carry authorization codes.
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            path = %request.uri().path()
                        )
                    },
                ))
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .with_state(state)
}

/// Serve the webhook listener until `shutdown` resolves.
///
/// In-flight requests are allowed to finish once shutdown starts.
///
/// # Errors
///
/// Returns [`ServiceError::BindFailed`] if the address cannot be bound and
/// [`ServiceError::ServerFailed`] if serving fails.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.server_addr()?;
    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.to_string(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// ============================================================================
// Webhook Handler
// ============================================================================

/// Handle an EventSub delivery
///
/// The body is buffered completely before anything else happens; the
/// signature covers the exact bytes.
#[instrument(skip(state, headers, body), fields(message_id, message_type))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookHandlerError> {
    // Values that are not visible ASCII are treated as absent.
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let request = WebhookRequest::new(WebhookHeaders::from_http_headers(&header_map), body);

    let span = tracing::Span::current();
    if let Some(id) = request.headers.message_id.as_deref() {
        span.record("message_id", id);
    }
    if let Some(kind) = request.message_type() {
        span.record("message_type", kind);
    }

    let outcome = match state.processor.process(&request) {
        Ok(outcome) => outcome,
        Err(e) => {
            match &e {
                WebhookError::InvalidSignature { .. } => state.metrics.record_signature_failure(),
                WebhookError::UnknownMessageType { .. } | WebhookError::MalformedPayload { .. } => {
                    state.metrics.record_webhook_message(request.message_type())
                }
                WebhookError::Validation(_) => {}
            }
            return Err(e.into());
        }
    };

    state.metrics.record_webhook_message(request.message_type());

    let response = match outcome {
        WebhookOutcome::Challenge(challenge) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            challenge,
        )
            .into_response(),
        WebhookOutcome::Notification {
            subscription_type,
            dispatch,
        } => {
            state.metrics.record_dispatch(&subscription_type, &dispatch);
            StatusCode::NO_CONTENT.into_response()
        }
        WebhookOutcome::Revoked { .. } => StatusCode::NO_CONTENT.into_response(),
    };

    Ok(response)
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_BODY)
}

async fn not_found(uri: Uri) -> (StatusCode, &'static str) {
    info!(path = %uri.path(), "Unknown path");
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

// ============================================================================
// Login Handler
// ============================================================================

/// Query parameters the identity service redirects back with
#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// OAuth authorization-code login
///
/// Without `code` the caller is redirected to the identity service; with
/// `code` the code is exchanged, the token validated and the resulting
/// user compared with the configured one.
#[instrument(skip_all)]
pub async fn handle_login(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Result<Response, LoginError> {
    if let Some(error) = params.error {
        return Err(LoginError::AccessDenied {
            reason: params.error_description.unwrap_or(error),
        });
    }

    let redirect_uri = redirect_uri(&state.config.oauth, &headers, &uri)?;

    let Some(code) = params.code else {
        let location = state.identity.authorization_url(&redirect_uri)?;
        info!(redirect_uri = %redirect_uri, "Redirecting to identity service");
        return Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response());
    };

    let timeout = state.config.oauth.request_timeout();
    let identity = tokio::time::timeout(timeout, async {
        let token = state.identity.exchange_code(&code, &redirect_uri).await?;
        state.identity.validate_token(&token).await
    })
    .await
    .map_err(|_| LoginError::Timeout {
        seconds: timeout.as_secs(),
    })??;

    if identity.user_id != state.config.oauth.expected_user_id {
        warn!(
            login = %identity.login,
            user_id = %identity.user_id,
            "Login by an account other than the configured one"
        );
        return Err(LoginError::UnexpectedAccount {
            login: identity.login,
        });
    }

    info!(login = %identity.login, user_id = %identity.user_id, "Login successful");
    Ok((StatusCode::OK, format!("Logged in as {}.", identity.login)).into_response())
}

/// The URL of this request, as the identity service must see it.
fn redirect_uri(oauth: &OAuthConfig, headers: &HeaderMap, uri: &Uri) -> Result<String, LoginError> {
    let base = match &oauth.public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .filter(|h| !h.is_empty())
                .ok_or(LoginError::MissingHost)?;
            format!("http://{}", host)
        }
    };

    Ok(format!("{}{}", base, uri.path()))
}

// ============================================================================
// Observability
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.set_subscribers_connected(state.registry.len());
    state
        .metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Request logging middleware
///
/// Assigns or propagates `x-correlation-id` and logs completion at a level
/// matching the status class.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri().path(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
