//! Wiring from the monitor's event stream to submission and notification.
//!
//! Each event is classified once; the submission runs on its own task while
//! the notification is dispatched, and neither waits on the other's result.
//! The event's background lease moves into the submission task and is
//! released when that task finishes, however it finishes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::classifier::{Classification, TriggerClassifier};
use crate::error::PipelineError;
use crate::models::LocationSample;
use crate::monitor::LocationEvent;
use crate::notify::NotificationDispatcher;
use crate::platform::{ClientEvent, ClientEventType, TelemetrySink};
use crate::submission::{SubmissionClient, SubmissionOutcome};

// ---

/// Everything that happened for one event.
#[derive(Debug)]
pub struct ProcessedEvent {
    pub classification: Classification,
    pub sample: LocationSample,
    pub outcome: SubmissionOutcome,
    pub notified: bool,
}

#[derive(Clone)]
pub struct LocationPipeline {
    classifier: Arc<TriggerClassifier>,
    submission: Arc<SubmissionClient>,
    notifications: Arc<NotificationDispatcher>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl LocationPipeline {
    // ---
    pub fn new(
        classifier: TriggerClassifier,
        submission: Arc<SubmissionClient>,
        notifications: Arc<NotificationDispatcher>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            submission,
            notifications,
            telemetry,
        }
    }

    /// Classify one event, submit it and dispatch its notification.
    pub async fn process(&self, event: LocationEvent) -> ProcessedEvent {
        // ---
        let LocationEvent {
            trigger,
            zone,
            location,
            lease,
        } = event;

        let classification = self.classifier.classify(trigger, zone.as_ref());
        let sample = classification.shell.fill(
            &location,
            self.submission.battery_percent(),
            self.submission.device(),
        );

        self.telemetry.record_event(ClientEvent::new(
            classification.decision.body.clone(),
            ClientEventType::LocationUpdate,
            serde_json::to_value(&sample).unwrap_or_default(),
        ));

        let submission = self.submission.clone();
        let payload = sample.clone();
        let submit = tokio::spawn(async move {
            let outcome = submission.submit(&payload).await;
            drop(lease);
            outcome
        });

        let notified = self.notifications.dispatch(&classification.decision);

        let outcome = submit.await.unwrap_or_else(|e| {
            Err(PipelineError::NetworkError {
                status: None,
                detail: format!("submission task failed: {e}"),
            })
        });

        debug!(
            trigger = trigger.as_str(),
            notified,
            success = outcome.is_ok(),
            "location event processed"
        );

        ProcessedEvent {
            classification,
            sample,
            outcome,
            notified,
        }
    }

    /// Consume the monitor's event stream until it closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<LocationEvent>) {
        // ---
        let mut in_flight = JoinSet::new();

        while let Some(event) = events.recv().await {
            let pipeline = self.clone();
            in_flight.spawn(async move {
                pipeline.process(event).await;
            });
            // Reap whatever already finished
            while in_flight.try_join_next().is_some() {}
        }

        info!(
            in_flight = in_flight.len(),
            "location event stream closed, waiting for in-flight submissions"
        );
        while in_flight.join_next().await.is_some() {}
    }
}
