//! # Twitch Relay Core
//!
//! Core logic for the Twitch relay: EventSub webhook verification and
//! classification, the registry of authenticated real-time subscribers, the
//! fan-out dispatcher that pushes events to them, and the client used for the
//! OAuth authorization-code exchange.
//!
//! ## Architecture
//!
//! The core holds no transport code. HTTP and WebSocket handling live in
//! `twitch-relay-api`, which feeds raw request bytes and socket frames into
//! the types exported here:
//!
//! - [`webhook::signature::verify`] checks the EventSub HMAC signature
//! - [`webhook::WebhookMessage`] classifies a verified request
//! - [`registry::ConnectionRegistry`] holds authenticated subscribers
//! - [`dispatcher::FanoutDispatcher`] broadcasts events to the registry
//! - [`gateway::SubscriberSession`] runs the per-connection handshake
//! - [`identity::IdentityProvider`] abstracts the OAuth identity service
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use twitch_relay_core::registry::ConnectionRegistry;
//!
//! let registry = Arc::new(ConnectionRegistry::new());
//! assert!(registry.is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod dispatcher;
pub mod gateway;
pub mod identity;
pub mod registry;
pub mod webhook;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identifier of an authenticated subscriber connection.
///
/// Allocated from a monotonically increasing counter owned by the
/// [`registry::ConnectionRegistry`]. Identifiers are never reused within
/// the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw identifier value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// A shared secret held in memory: the EventSub signing secret or the
/// subscriber password.
///
/// The value is wiped on drop and never shown by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw secret, e.g. to key an HMAC.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compare a candidate against the secret in constant time.
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let candidate = candidate.as_bytes();

        if expected.len() != candidate.len() {
            return false;
        }

        expected.ct_eq(candidate).into()
    }

    /// Returns `true` if no secret has been configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length of the secret in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<REDACTED>)")
    }
}

impl From<String> for SharedSecret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for SharedSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
