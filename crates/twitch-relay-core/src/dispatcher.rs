//! Fan-out of notification events to authenticated subscribers.

use crate::registry::{ConnectionRegistry, DeliveryError, OutboundPayload};
use crate::webhook::SubscriptionEvent;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts from a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    /// Number of subscribers the broadcast was offered to
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// What the dispatcher did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The subscription type is forwarded; the event went to every subscriber.
    Broadcast(BroadcastReport),

    /// The subscription type is not forwarded; nothing was sent.
    Ignored,
}

/// Delivers events to every connection in the [`ConnectionRegistry`].
///
/// Only events whose subscription type is in the forwarded set are
/// broadcast. A subscriber whose connection is gone is skipped and logged;
/// its own close handler removes it from the registry. A subscriber whose
/// queue is full is evicted and told to close, so it never stays connected
/// with a gap in its stream.
#[derive(Debug)]
pub struct FanoutDispatcher {
    registry: Arc<ConnectionRegistry>,
    forwarded_types: HashSet<String>,
}

impl FanoutDispatcher {
    /// Create a dispatcher over `registry` forwarding `forwarded_types`.
    pub fn new<I, S>(registry: Arc<ConnectionRegistry>, forwarded_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry,
            forwarded_types: forwarded_types.into_iter().map(Into::into).collect(),
        }
    }

    /// The registry this dispatcher delivers to.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns `true` if events of `subscription_type` are broadcast.
    pub fn is_forwarded(&self, subscription_type: &str) -> bool {
        self.forwarded_types.contains(subscription_type)
    }

    /// Broadcast `event` if its subscription type is forwarded.
    pub fn dispatch(&self, event: &SubscriptionEvent) -> DispatchOutcome {
        if !self.is_forwarded(&event.subscription_type) {
            info!(
                subscription_type = %event.subscription_type,
                "Got unknown notification type; not forwarding"
            );
            return DispatchOutcome::Ignored;
        }

        let report = self.broadcast(event.payload());
        info!(
            subscription_type = %event.subscription_type,
            delivered = report.delivered,
            failed = report.failed,
            "Forwarded notification to subscribers"
        );
        DispatchOutcome::Broadcast(report)
    }

    /// Send `payload` to every registered connection.
    ///
    /// The payload is allocated once and shared by all queues. Failures do not
    /// stop delivery to the remaining connections.
    pub fn broadcast(&self, payload: &str) -> BroadcastReport {
        let payload: OutboundPayload = Arc::from(payload);
        let mut report = BroadcastReport::default();
        let mut overflowed = Vec::new();

        self.registry.for_each(|id, handle| {
            match handle.try_deliver(Arc::clone(&payload)) {
                Ok(()) => {
                    debug!(connection_id = %id, "Queued broadcast for subscriber");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        connection_id = %id,
                        error = %e,
                        "Failed to queue broadcast for subscriber"
                    );
                    if e == DeliveryError::Full {
                        overflowed.push(id);
                    }
                    report.failed += 1;
                }
            }
        });

        // The walk holds the registry lock, so eviction happens after it.
        for id in overflowed {
            if let Some(handle) = self.registry.remove(id) {
                warn!(connection_id = %id, "Subscriber fell behind; disconnecting");
                handle.close();
            }
        }

        report
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
