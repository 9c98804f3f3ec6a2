//! WebSocket transport for real-time subscribers.
//!
//! Each connection gets a [`SubscriberSession`] for the handshake, a bounded
//! outbound queue drained by a writer task, and a read loop that feeds
//! inbound frames to the session in arrival order. Broadcasts and replies
//! share the queue, so a subscriber sees them in the order they were queued.
//! A subscriber evicted for falling behind receives what was already queued
//! and then a Close frame.

use crate::errors::ServiceError;
use crate::metrics::RelayMetrics;
use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use twitch_relay_core::gateway::{SessionOutcome, SubscriberSession};
use twitch_relay_core::registry::{ConnectionHandle, ConnectionRegistry};
use twitch_relay_core::SharedSecret;

/// Shared state for the subscriber listener
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub password: SharedSecret,
    pub outbound_capacity: usize,
    pub metrics: Arc<RelayMetrics>,
}

/// What the read loop does with one frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameAction {
    Reply(String),
    Close,
    Ignore,
}

/// Router accepting WebSocket upgrades on any path.
pub fn create_gateway_router(state: GatewayState) -> Router {
    Router::new()
        .fallback(handle_upgrade)
        .with_state(state)
}

async fn handle_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all)]
async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = ConnectionHandle::channel(state.outbound_capacity);
    let replies = outbound.clone();
    let mut session = SubscriberSession::new(
        Arc::clone(&state.registry),
        state.password.clone(),
        outbound,
    );

    debug!("Subscriber connected");

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if sender.send(Message::Text(Utf8Bytes::from(&*payload))).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        let frame = tokio::select! {
            _ = replies.closed() => {
                info!("Subscriber evicted; closing connection");
                break;
            }
            frame = receiver.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(error = %e, "Subscriber socket error");
                break;
            }
            None => break,
        };

        let action = handle_frame(&mut session, frame);
        state.metrics.set_subscribers_connected(state.registry.len());

        match action {
            FrameAction::Reply(reply) => {
                if replies.deliver(Arc::from(reply)).await.is_err() {
                    break;
                }
            }
            FrameAction::Close => break,
            FrameAction::Ignore => {}
        }
    }

    // Deregisters and drops the registry's sender; with `replies` gone the
    // writer drains what is queued and exits.
    drop(session);
    drop(replies);
    state.metrics.set_subscribers_connected(state.registry.len());

    if let Err(e) = writer.await {
        warn!(error = %e, "Subscriber writer task failed");
    }
    debug!("Subscriber connection closed");
}

/// Feed one frame to the session.
pub(crate) fn handle_frame(session: &mut SubscriberSession, frame: Message) -> FrameAction {
    let outcome = match frame {
        Message::Text(text) => session.handle_message(text.as_str()),
        Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => session.handle_message(text),
            Err(_) => {
                warn!("Non-UTF-8 binary frame from subscriber; disconnecting");
                session.close();
                SessionOutcome::Close
            }
        },
        Message::Close(_) => {
            session.close();
            SessionOutcome::Close
        }
        // Pongs are sent by the transport.
        Message::Ping(_) | Message::Pong(_) => return FrameAction::Ignore,
    };

    match outcome {
        SessionOutcome::Reply(reply) => FrameAction::Reply(reply.to_json()),
        SessionOutcome::Close => FrameAction::Close,
    }
}

/// Serve the subscriber listener until `handle` is told to shut down.
///
/// Uses TLS when a certificate is configured, plain WebSocket otherwise.
///
/// # Errors
///
/// Returns [`ServiceError::Tls`] if the certificate or key cannot be loaded,
/// [`ServiceError::BindFailed`] if the address is taken and
/// [`ServiceError::ServerFailed`] if serving fails.
pub async fn start_subscriber_server(
    addr: SocketAddr,
    tls: Option<&crate::config::TlsConfig>,
    state: GatewayState,
    handle: axum_server::Handle,
) -> Result<(), ServiceError> {
    let tls_config = match tls {
        Some(tls) => Some(crate::tls::load_server_config(&tls.cert_path, &tls.key_path)?),
        None => None,
    };

    let listener = std::net::TcpListener::bind(addr).map_err(|e| ServiceError::BindFailed {
        address: addr.to_string(),
        message: e.to_string(),
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    let app = create_gateway_router(state);

    let served = match tls_config {
        Some(server_config) => {
            info!(address = %addr, "Starting subscriber listener (TLS)");
            axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(Arc::new(server_config)))
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            warn!(
                address = %addr,
                "No subscriber TLS configured; serving plain WebSocket. Do not use in production."
            );
            axum_server::from_tcp(listener)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };

    served.map_err(|e| ServiceError::ServerFailed {
        message: e.to_string(),
    })?;

    info!("Subscriber listener shutdown complete");
    Ok(())
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
