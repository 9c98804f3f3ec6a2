//! Per-connection authentication handshake for real-time subscribers.
//!
//! A [`SubscriberSession`] is transport-agnostic: the WebSocket layer feeds it
//! each text frame and sends back whatever [`SessionOutcome`] it returns.
//!
//! ```text
//! Unauthenticated --(correct password)--> Authenticated(id) --(close)--> Closed
//!        |  ^                                     |
//!        +--+ (wrong password: WRONG_PASSWORD)    +-- any JSON: placeholder reply
//! ```
//!
//! Malformed JSON in any state closes the connection. The registry entry for
//! an authenticated session is removed when the session is closed or
//! dropped, whichever happens first.

use crate::registry::{ConnectionHandle, ConnectionRegistry, RegistryError};
use crate::{ConnectionId, SharedSecret};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Error code sent when the password is missing or wrong.
pub const WRONG_PASSWORD: &str = "WRONG_PASSWORD";

/// Reply to messages received after authentication.
pub const AUTHENTICATED_PLACEHOLDER: &str =
    "Authenticated. No commands are supported yet; message ignored.";

/// Where a session is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(ConnectionId),
    Closed,
}

/// JSON reply sent to the subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GatewayReply {
    /// `{"success":true}`
    pub fn authenticated() -> Self {
        Self {
            success: true,
            error: None,
            message: None,
        }
    }

    /// `{"success":false,"error":"WRONG_PASSWORD"}`
    pub fn wrong_password() -> Self {
        Self {
            success: false,
            error: Some(WRONG_PASSWORD),
            message: None,
        }
    }

    /// `{"success":true,"message":"..."}`
    pub fn placeholder() -> Self {
        Self {
            success: true,
            error: None,
            message: Some(AUTHENTICATED_PLACEHOLDER.to_string()),
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> String {
        // Only strings and a bool; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"success\":false}"))
    }
}

/// What the transport should do after a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Send this reply and keep reading.
    Reply(GatewayReply),

    /// Close the connection without replying.
    Close,
}

/// Handshake state for one subscriber connection.
///
/// Dropping the session deregisters it, so every exit path of the
/// connection's read loop removes its registry entry exactly once.
#[derive(Debug)]
pub struct SubscriberSession {
    state: SessionState,
    registry: Arc<ConnectionRegistry>,
    password: SharedSecret,
    outbound: ConnectionHandle,
}

impl SubscriberSession {
    /// Start an unauthenticated session whose broadcasts go to `outbound`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        password: SharedSecret,
        outbound: ConnectionHandle,
    ) -> Self {
        Self {
            state: SessionState::Unauthenticated,
            registry,
            password,
            outbound,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The registry id, once authenticated.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self.state {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    /// Handle one inbound text message.
    pub fn handle_message(&mut self, text: &str) -> SessionOutcome {
        let parsed: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    state = ?self.state,
                    error = %e,
                    "Error parsing subscriber message as JSON; disconnecting"
                );
                self.close();
                return SessionOutcome::Close;
            }
        };

        match self.state {
            SessionState::Unauthenticated => self.authenticate(&parsed),
            SessionState::Authenticated(id) => {
                debug!(connection_id = %id, "Ignoring message from authenticated subscriber");
                SessionOutcome::Reply(GatewayReply::placeholder())
            }
            SessionState::Closed => SessionOutcome::Close,
        }
    }

    fn authenticate(&mut self, parsed: &serde_json::Value) -> SessionOutcome {
        let candidate = parsed.get("password").and_then(serde_json::Value::as_str);

        let accepted = candidate.is_some_and(|p| self.password.matches(p));
        if !accepted {
            warn!(
                password_present = candidate.is_some(),
                "Subscriber authentication failed"
            );
            return SessionOutcome::Reply(GatewayReply::wrong_password());
        }

        let id = self.registry.next_id();
        if let Err(RegistryError::AlreadyRegistered { id }) =
            self.registry.insert(id, self.outbound.clone())
        {
            // next_id never repeats, so this means the registry was tampered with.
            warn!(connection_id = %id, "Connection id already registered; disconnecting");
            self.state = SessionState::Closed;
            return SessionOutcome::Close;
        }

        self.state = SessionState::Authenticated(id);
        info!(
            connection_id = %id,
            subscribers = self.registry.len(),
            "Subscriber authenticated"
        );
        SessionOutcome::Reply(GatewayReply::authenticated())
    }

    /// Close the session, deregistering it if it was authenticated.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if let SessionState::Authenticated(id) = self.state {
            if self.registry.remove(id).is_some() {
                info!(
                    connection_id = %id,
                    subscribers = self.registry.len(),
                    "Subscriber disconnected"
                );
            }
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for SubscriberSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
