//! # Webhook Processing Module
//!
//! Handles Twitch EventSub webhook deliveries: header extraction, signature
//! verification, message classification and hand-off of notifications to the
//! [`FanoutDispatcher`].
//!
//! EventSub uses three message types, carried in the
//! `Twitch-Eventsub-Message-Type` header:
//!
//! | Header value | Payload | Required reply |
//! |--------------|---------|----------------|
//! | `webhook_callback_verification` | `challenge` | 200, body = challenge |
//! | `notification` | `subscription.type`, `event` | 204 |
//! | `revocation` | `subscription.id` | 204 |

pub mod signature;

use crate::dispatcher::{DispatchOutcome, FanoutDispatcher};
use crate::{SharedSecret, ValidationError};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// `Twitch-Eventsub-Message-Id` header (lowercase form)
pub const HEADER_MESSAGE_ID: &str = "twitch-eventsub-message-id";

/// `Twitch-Eventsub-Message-Timestamp` header (lowercase form)
pub const HEADER_MESSAGE_TIMESTAMP: &str = "twitch-eventsub-message-timestamp";

/// `Twitch-Eventsub-Message-Signature` header (lowercase form)
pub const HEADER_MESSAGE_SIGNATURE: &str = "twitch-eventsub-message-signature";

/// `Twitch-Eventsub-Message-Type` header (lowercase form)
pub const HEADER_MESSAGE_TYPE: &str = "twitch-eventsub-message-type";

// ============================================================================
// Core Types
// ============================================================================

/// Raw HTTP request data from an EventSub delivery.
///
/// The body is kept as the exact bytes received; the signature covers those
/// bytes, so it must never be re-serialized before verification.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: WebhookHeaders,
    pub body: Bytes,
}

impl WebhookRequest {
    /// Create new webhook request
    pub fn new(headers: WebhookHeaders, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Get the message type header value if present
    pub fn message_type(&self) -> Option<&str> {
        self.headers.message_type.as_deref()
    }
}

/// EventSub headers relevant to processing.
///
/// Every field is optional at extraction time; which ones are required
/// depends on the processing stage (see [`WebhookHeaders::signature_context`]).
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub message_type: Option<String>,
}

impl WebhookHeaders {
    /// Extract EventSub headers from an HTTP header map.
    ///
    /// Header names are matched case-insensitively.
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Self {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        };

        Self {
            message_id: lookup(HEADER_MESSAGE_ID),
            timestamp: lookup(HEADER_MESSAGE_TIMESTAMP),
            signature: lookup(HEADER_MESSAGE_SIGNATURE),
            message_type: lookup(HEADER_MESSAGE_TYPE),
        }
    }

    /// Build the [`SignatureContext`] for verification.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Required`] naming the first missing header
    /// out of signature, message id and timestamp.
    pub fn signature_context(&self) -> Result<SignatureContext, ValidationError> {
        let signature = self
            .signature
            .clone()
            .ok_or_else(|| ValidationError::Required {
                field: HEADER_MESSAGE_SIGNATURE.to_string(),
            })?;

        let message_id = self
            .message_id
            .clone()
            .ok_or_else(|| ValidationError::Required {
                field: HEADER_MESSAGE_ID.to_string(),
            })?;

        let timestamp = self
            .timestamp
            .clone()
            .ok_or_else(|| ValidationError::Required {
                field: HEADER_MESSAGE_TIMESTAMP.to_string(),
            })?;

        Ok(SignatureContext {
            message_id,
            timestamp,
            signature,
        })
    }
}

/// The header values the EventSub signature is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureContext {
    pub message_id: String,
    pub timestamp: String,
    pub signature: String,
}

impl SignatureContext {
    /// Check the claimed signature against `body` using `secret`.
    pub fn verify(&self, secret: &SharedSecret, body: &[u8]) -> bool {
        signature::verify(
            secret.expose(),
            &self.message_id,
            &self.timestamp,
            body,
            &self.signature,
        )
    }
}

/// EventSub message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Verification,
    Notification,
    Revocation,
}

impl MessageType {
    /// Get the header value for this message type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "webhook_callback_verification",
            Self::Notification => "notification",
            Self::Revocation => "revocation",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook_callback_verification" => Ok(Self::Verification),
            "notification" => Ok(Self::Notification),
            "revocation" => Ok(Self::Revocation),
            other => Err(WebhookError::UnknownMessageType {
                message_type: other.to_string(),
            }),
        }
    }
}

/// A notification event as delivered by EventSub.
///
/// `event` holds the exact JSON text of the `event` field from the request
/// body, so forwarding it to subscribers sends the publisher's bytes
/// verbatim.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub subscription_type: String,
    pub subscription_id: Option<String>,
    pub event: Box<RawValue>,
}

impl SubscriptionEvent {
    /// Build an event from its tag and JSON payload text.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if `event_json` is not valid JSON.
    pub fn new(
        subscription_type: impl Into<String>,
        event_json: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            subscription_type: subscription_type.into(),
            subscription_id: None,
            event: RawValue::from_string(event_json.into())?,
        })
    }

    /// The serialized event payload sent to subscribers.
    pub fn payload(&self) -> &str {
        self.event.get()
    }
}

/// A classified EventSub message.
#[derive(Debug, Clone)]
pub enum WebhookMessage {
    /// Subscription handshake; the challenge must be echoed back.
    Verification {
        challenge: String,
        subscription_id: Option<String>,
    },

    /// An event for an active subscription.
    Notification(SubscriptionEvent),

    /// The publisher revoked a subscription.
    Revocation {
        subscription_id: String,
        subscription_type: Option<String>,
        status: Option<String>,
    },

    /// The message type header was missing or not one EventSub defines.
    Unknown { message_type: Option<String> },
}

// Wire shapes. Only the fields the relay reads are declared.

#[derive(Debug, Deserialize)]
struct VerificationPayload {
    challenge: String,
    #[serde(default)]
    subscription: Option<SubscriptionRef>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    subscription: NotificationSubscription,
    event: Box<RawValue>,
}

#[derive(Debug, Deserialize)]
struct NotificationSubscription {
    #[serde(rename = "type")]
    subscription_type: String,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RevocationPayload {
    subscription: RevokedSubscription,
}

#[derive(Debug, Deserialize)]
struct RevokedSubscription {
    id: String,
    #[serde(rename = "type", default)]
    subscription_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionRef {
    #[serde(default)]
    id: Option<String>,
}

impl WebhookMessage {
    /// Decode a verified request body according to its message type header.
    ///
    /// A missing or unrecognised message type yields
    /// [`WebhookMessage::Unknown`] without inspecting the body.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::MalformedPayload`] when the body is not JSON or
    /// lacks the fields its message type requires.
    pub fn classify(message_type: Option<&str>, body: &[u8]) -> Result<Self, WebhookError> {
        let kind = match message_type.map(MessageType::from_str) {
            Some(Ok(kind)) => kind,
            Some(Err(_)) | None => {
                return Ok(Self::Unknown {
                    message_type: message_type.map(str::to_string),
                })
            }
        };

        let malformed = |e: serde_json::Error| WebhookError::MalformedPayload {
            message_type: kind,
            message: e.to_string(),
        };

        match kind {
            MessageType::Verification => {
                let payload: VerificationPayload =
                    serde_json::from_slice(body).map_err(malformed)?;
                Ok(Self::Verification {
                    challenge: payload.challenge,
                    subscription_id: payload.subscription.and_then(|s| s.id),
                })
            }
            MessageType::Notification => {
                let payload: NotificationPayload =
                    serde_json::from_slice(body).map_err(malformed)?;
                Ok(Self::Notification(SubscriptionEvent {
                    subscription_type: payload.subscription.subscription_type,
                    subscription_id: payload.subscription.id,
                    event: payload.event,
                }))
            }
            MessageType::Revocation => {
                let payload: RevocationPayload =
                    serde_json::from_slice(body).map_err(malformed)?;
                Ok(Self::Revocation {
                    subscription_id: payload.subscription.id,
                    subscription_type: payload.subscription.subscription_type,
                    status: payload.subscription.status,
                })
            }
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Top-level error for webhook processing failures
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Signature validation failed for message {message_id}")]
    InvalidSignature { message_id: String },

    #[error("Unsupported message type: {message_type}")]
    UnknownMessageType { message_type: String },

    #[error("Malformed {message_type} payload: {message}")]
    MalformedPayload {
        message_type: MessageType,
        message: String,
    },
}

impl WebhookError {
    /// Check if error is an authentication failure rather than a malformed request
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::InvalidSignature { .. })
    }
}

// ============================================================================
// Processing
// ============================================================================

/// Result of successfully processing one delivery.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// Echo this challenge with HTTP 200.
    Challenge(String),

    /// Notification acknowledged; fan-out result attached.
    Notification {
        subscription_type: String,
        dispatch: DispatchOutcome,
    },

    /// Revocation acknowledged.
    Revoked { subscription_id: String },
}

/// Verifies and classifies EventSub deliveries and dispatches notifications.
pub struct EventSubProcessor {
    secret: SharedSecret,
    dispatcher: Arc<FanoutDispatcher>,
}

impl EventSubProcessor {
    /// Create a processor verifying with `secret` and forwarding through `dispatcher`.
    pub fn new(secret: SharedSecret, dispatcher: Arc<FanoutDispatcher>) -> Self {
        Self { secret, dispatcher }
    }

    /// Run one delivery through verify → classify → dispatch.
    ///
    /// Verification happens on the complete body before anything is parsed.
    /// Fan-out never fails the request: undeliverable subscribers are logged
    /// by the dispatcher and reported in the outcome.
    ///
    /// # Errors
    ///
    /// - [`WebhookError::Validation`] if signature, id or timestamp header is missing
    /// - [`WebhookError::InvalidSignature`] if the HMAC does not match
    /// - [`WebhookError::UnknownMessageType`] for a missing or unsupported type
    /// - [`WebhookError::MalformedPayload`] if the body does not decode
    pub fn process(&self, request: &WebhookRequest) -> Result<WebhookOutcome, WebhookError> {
        let context = request.headers.signature_context()?;

        if !context.verify(&self.secret, &request.body) {
            warn!(
                message_id = %context.message_id,
                "EventSub signature mismatch; rejecting delivery"
            );
            return Err(WebhookError::InvalidSignature {
                message_id: context.message_id,
            });
        }

        match WebhookMessage::classify(request.message_type(), &request.body)? {
            WebhookMessage::Verification {
                challenge,
                subscription_id,
            } => {
                info!(
                    message_id = %context.message_id,
                    subscription_id = subscription_id.as_deref().unwrap_or("unknown"),
                    "Acknowledged new subscription"
                );
                Ok(WebhookOutcome::Challenge(challenge))
            }
            WebhookMessage::Notification(event) => {
                let dispatch = self.dispatcher.dispatch(&event);
                Ok(WebhookOutcome::Notification {
                    subscription_type: event.subscription_type,
                    dispatch,
                })
            }
            WebhookMessage::Revocation {
                subscription_id,
                subscription_type,
                status,
            } => {
                info!(
                    message_id = %context.message_id,
                    subscription_id = %subscription_id,
                    subscription_type = subscription_type.as_deref().unwrap_or("unknown"),
                    status = status.as_deref().unwrap_or("unknown"),
                    "Revocation of subscription acknowledged"
                );
                Ok(WebhookOutcome::Revoked { subscription_id })
            }
            WebhookMessage::Unknown { message_type } => Err(WebhookError::UnknownMessageType {
                message_type: message_type.unwrap_or_else(|| "<missing>".to_string()),
            }),
        }
    }
}

impl fmt::Debug for EventSubProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubProcessor")
            .field("secret", &"<REDACTED>")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
