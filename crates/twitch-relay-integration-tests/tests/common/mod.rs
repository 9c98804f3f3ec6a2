//! Common test utilities for twitch-relay integration tests
//!
//! This module provides:
//! - A complete service configuration with test secrets
//! - App state wired the way the binary wires it
//! - Signed EventSub request builders
//! - Subscriber sessions backed by in-memory outbound queues

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request};
use std::sync::Arc;
use tokio::sync::mpsc;
use twitch_relay_api::{AppState, RelayMetrics, ServiceConfig};
use twitch_relay_core::dispatcher::FanoutDispatcher;
use twitch_relay_core::gateway::{SessionOutcome, SubscriberSession};
use twitch_relay_core::identity::TwitchIdentityClient;
use twitch_relay_core::registry::{ConnectionHandle, ConnectionRegistry, OutboundPayload};
use twitch_relay_core::webhook::signature::compute_signature;
use twitch_relay_core::webhook::{
    HEADER_MESSAGE_ID, HEADER_MESSAGE_SIGNATURE, HEADER_MESSAGE_TIMESTAMP, HEADER_MESSAGE_TYPE,
};
use twitch_relay_core::SharedSecret;

pub const WEBHOOK_SECRET: &str = "s3cr3t-webhook-key";
pub const SUBSCRIBER_PASSWORD: &str = "overlay-password";
pub const EXPECTED_USER_ID: &str = "141981764";
pub const WEBHOOK_PATH: &str = "/twitch/callback";

pub const FOLLOW_EVENT: &str = r#"{"user_id":"1234","user_login":"cool_user","user_name":"Cool_User","broadcaster_user_id":"141981764","broadcaster_user_login":"streamer","broadcaster_user_name":"Streamer","followed_at":"2023-07-15T18:16:11.17106713Z"}"#;

pub fn follow_notification() -> String {
    format!(
        r#"{{"subscription":{{"id":"f1c2a387-161a-49f9-a165-0f21d7a4e1c4","type":"channel.follow","version":"2","status":"enabled","condition":{{"broadcaster_user_id":"141981764","moderator_user_id":"141981764"}}}},"event":{}}}"#,
        FOLLOW_EVENT
    )
}

/// Configuration with every required value filled in.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.webhooks.secret = SharedSecret::new(WEBHOOK_SECRET);
    config.subscribers.password = SharedSecret::new(SUBSCRIBER_PASSWORD);
    config.oauth.client_id = "relay-client".to_string();
    config.oauth.client_secret = SharedSecret::new("relay-client-secret");
    config.oauth.expected_user_id = EXPECTED_USER_ID.to_string();
    config
}

/// App state built from `config` with the real identity client.
pub fn create_test_app_state(config: ServiceConfig) -> AppState {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(FanoutDispatcher::new(
        registry,
        config.webhooks.forwarded_subscription_types.clone(),
    ));
    let identity = TwitchIdentityClient::new(config.oauth.identity_client_config())
        .expect("identity client");
    let metrics = RelayMetrics::new().expect("metrics");

    AppState::new(config, dispatcher, Arc::new(identity), metrics)
}

/// EventSub headers signed with [`WEBHOOK_SECRET`].
pub fn signed_headers(message_id: &str, message_type: &str, body: &str) -> HeaderMap {
    let timestamp = "2023-07-15T18:16:11.17106713Z";
    let signature = compute_signature(WEBHOOK_SECRET, message_id, timestamp, body.as_bytes());

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_MESSAGE_ID, HeaderValue::from_str(message_id).unwrap());
    headers.insert(HEADER_MESSAGE_TIMESTAMP, HeaderValue::from_static(timestamp));
    headers.insert(
        HEADER_MESSAGE_SIGNATURE,
        HeaderValue::from_str(&signature).unwrap(),
    );
    headers.insert(
        HEADER_MESSAGE_TYPE,
        HeaderValue::from_str(message_type).unwrap(),
    );
    headers
}

/// A POST to the webhook path carrying `headers` and `body`.
pub fn webhook_request(headers: HeaderMap, body: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .body(Body::from(body.to_string()))
        .unwrap();
    *request.headers_mut() = headers;
    request
}

/// A subscriber session and the receiving end of its outbound queue.
pub struct TestSubscriber {
    pub session: SubscriberSession,
    pub outbound: mpsc::Receiver<OutboundPayload>,
}

impl TestSubscriber {
    pub fn connect(state: &AppState) -> Self {
        let (handle, outbound) = ConnectionHandle::channel(16);
        let session = SubscriberSession::new(
            Arc::clone(&state.registry),
            state.config.subscribers.password.clone(),
            handle,
        );
        Self { session, outbound }
    }

    /// Connect and authenticate with the configured password.
    pub fn authenticated(state: &AppState) -> Self {
        let mut subscriber = Self::connect(state);
        let outcome = subscriber.send(&format!(r#"{{"password":"{}"}}"#, SUBSCRIBER_PASSWORD));
        assert!(matches!(outcome, SessionOutcome::Reply(ref reply) if reply.success));
        subscriber
    }

    pub fn send(&mut self, text: &str) -> SessionOutcome {
        self.session.handle_message(text)
    }

    /// Everything queued for this subscriber so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut received = Vec::new();
        while let Ok(payload) = self.outbound.try_recv() {
            received.push(payload.to_string());
        }
        received
    }
}

pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
