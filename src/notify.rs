//! Notification Dispatcher.
//!
//! Turns a [`NotificationDecision`] into a scheduled local notification. The
//! decision's identifier is the dedup key: the notifier replaces a pending
//! notification with the same identifier instead of stacking a new one, so a
//! device flapping across a zone boundary shows one notification, not ten.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::classifier::NotificationDecision;
use crate::platform::{ClientEvent, ClientEventType, Notifier, TelemetrySink};

// ---

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl NotificationDispatcher {
    // ---
    pub fn new(notifier: Arc<dyn Notifier>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            notifier,
            telemetry,
        }
    }

    /// Schedule the notification if the decision allows it. Returns whether
    /// anything was scheduled.
    pub fn dispatch(&self, decision: &NotificationDecision) -> bool {
        // ---
        if !decision.should_notify {
            debug!(identifier = %decision.identifier, "notification disabled for trigger");
            return false;
        }

        self.notifier
            .schedule(&decision.identifier, &decision.title, &decision.body);

        self.telemetry.record_event(ClientEvent::new(
            format!("Notification scheduled: {}", decision.body),
            ClientEventType::LocationUpdate,
            json!({
                "notification": {
                    "identifier": decision.identifier,
                    "title": decision.title,
                }
            }),
        ));
        true
    }
}
