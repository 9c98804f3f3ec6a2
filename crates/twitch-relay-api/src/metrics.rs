//! Prometheus metrics for the relay.
//!
//! Metrics live in a registry owned by [`RelayMetrics`] rather than the
//! process-global one, so several instances can coexist in one process.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use twitch_relay_core::dispatcher::DispatchOutcome;

/// Label values for `message_type`; anything else is reported as `other`.
const KNOWN_MESSAGE_TYPES: [&str; 3] = ["webhook_callback_verification", "notification", "revocation"];

/// Relay metrics
#[derive(Debug)]
pub struct RelayMetrics {
    registry: Registry,

    pub webhook_messages_total: IntCounterVec,
    pub signature_failures_total: IntCounter,
    pub unknown_subscription_types_total: IntCounterVec,
    pub broadcast_deliveries_total: IntCounterVec,
    pub subscribers_connected: IntGauge,
}

impl RelayMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let webhook_messages_total = IntCounterVec::new(
            Opts::new(
                "relay_webhook_messages_total",
                "Verified EventSub deliveries by message type",
            ),
            &["message_type"],
        )?;
        let signature_failures_total = IntCounter::new(
            "relay_webhook_signature_failures_total",
            "EventSub deliveries rejected for a bad signature",
        )?;
        let unknown_subscription_types_total = IntCounterVec::new(
            Opts::new(
                "relay_unknown_subscription_types_total",
                "Notifications accepted but not forwarded",
            ),
            &["subscription_type"],
        )?;
        let broadcast_deliveries_total = IntCounterVec::new(
            Opts::new(
                "relay_broadcast_deliveries_total",
                "Per-subscriber broadcast attempts by outcome",
            ),
            &["outcome"],
        )?;
        let subscribers_connected = IntGauge::new(
            "relay_subscribers_connected",
            "Authenticated subscriber connections",
        )?;

        registry.register(Box::new(webhook_messages_total.clone()))?;
        registry.register(Box::new(signature_failures_total.clone()))?;
        registry.register(Box::new(unknown_subscription_types_total.clone()))?;
        registry.register(Box::new(broadcast_deliveries_total.clone()))?;
        registry.register(Box::new(subscribers_connected.clone()))?;

        Ok(Arc::new(Self {
            registry,
            webhook_messages_total,
            signature_failures_total,
            unknown_subscription_types_total,
            broadcast_deliveries_total,
            subscribers_connected,
        }))
    }

    pub fn record_webhook_message(&self, message_type: Option<&str>) {
        let label = message_type
            .filter(|t| KNOWN_MESSAGE_TYPES.contains(t))
            .unwrap_or("other");
        self.webhook_messages_total.with_label_values(&[label]).inc();
    }

    pub fn record_signature_failure(&self) {
        self.signature_failures_total.inc();
    }

    pub fn record_dispatch(&self, subscription_type: &str, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Broadcast(report) => {
                self.broadcast_deliveries_total
                    .with_label_values(&["delivered"])
                    .inc_by(report.delivered as u64);
                self.broadcast_deliveries_total
                    .with_label_values(&["failed"])
                    .inc_by(report.failed as u64);
            }
            DispatchOutcome::Ignored => {
                self.unknown_subscription_types_total
                    .with_label_values(&[subscription_type])
                    .inc();
            }
        }
    }

    pub fn set_subscribers_connected(&self, count: usize) {
        self.subscribers_connected.set(count as i64);
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
