//! Notification gate: handshake, client-state check, deduplication and
//! hand-off to the processing pipeline.
//!
//! The gate never awaits processing. Every distinct message id that passes
//! validation is handed to an [`EventSink`] exactly once while its dedup
//! entry is live.

pub mod dedup;

use shared_types::NotificationBatch;
use std::sync::Arc;
use thiserror::Error;

use crate::config::DedupSettings;
pub use dedup::DedupTable;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("validationToken must not be empty")]
    EmptyValidationToken,

    #[error("notification {index} has no resource id")]
    MissingResourceId { index: usize },

    #[error("notification {index} has no clientState")]
    MissingClientState { index: usize },

    #[error("notification {index} has an unexpected clientState")]
    ClientStateMismatch { index: usize },
}

/// A message that should be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub message_id: String,
    pub subscription_id: Option<String>,
    pub change_type: Option<String>,
}

/// Receiver of accepted events. Must return without waiting for processing.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: NotificationEvent);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateReport {
    pub forwarded: usize,
    pub duplicates: usize,
}

pub struct NotificationGate {
    client_state: String,
    dedup: DedupTable,
    sink: Arc<dyn EventSink>,
}

impl NotificationGate {
    pub fn new(client_state: &str, dedup: DedupSettings, sink: Arc<dyn EventSink>) -> Self {
        Self {
            client_state: client_state.to_string(),
            dedup: DedupTable::new(dedup),
            sink,
        }
    }

    /// Subscription handshake: the token is echoed back unchanged
    pub fn handle_validation(&self, token: &str) -> Result<String, GateError> {
        if token.is_empty() {
            return Err(GateError::EmptyValidationToken);
        }
        tracing::info!("Answering subscription validation handshake");
        Ok(token.to_string())
    }

    /// Validate a batch, then forward each first-seen message id.
    ///
    /// A single invalid record rejects the whole batch before anything is
    /// forwarded.
    pub async fn handle_notification(
        &self,
        batch: &NotificationBatch,
    ) -> Result<GateReport, GateError> {
        let mut events = Vec::with_capacity(batch.value.len());

        for (index, notification) in batch.value.iter().enumerate() {
            let message_id = notification
                .resource_id()
                .ok_or(GateError::MissingResourceId { index })?;

            match notification.client_state.as_deref() {
                None => return Err(GateError::MissingClientState { index }),
                Some(state) if state != self.client_state => {
                    tracing::warn!(
                        "Rejecting notification batch: clientState mismatch at index {}",
                        index
                    );
                    return Err(GateError::ClientStateMismatch { index });
                }
                Some(_) => {}
            }

            events.push(NotificationEvent {
                message_id: message_id.to_string(),
                subscription_id: notification.subscription_id.clone(),
                change_type: notification.change_type.clone(),
            });
        }

        let mut report = GateReport::default();
        for event in events {
            if self.dedup.first_sighting(&event.message_id).await {
                tracing::info!("Accepted notification for message {}", event.message_id);
                self.sink.dispatch(event);
                report.forwarded += 1;
            } else {
                tracing::debug!("Dropping duplicate notification for {}", event.message_id);
                report.duplicates += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared_types::Notification;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sink that only records what it was given
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<NotificationEvent>>,
    }

    impl RecordingSink {
        pub fn message_ids(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.message_id.clone())
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn dispatch(&self, event: NotificationEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn gate() -> (NotificationGate, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let gate = NotificationGate::new("secret", DedupSettings::default(), sink.clone());
        (gate, sink)
    }

    fn batch(notifications: Vec<Notification>) -> NotificationBatch {
        NotificationBatch {
            value: notifications,
        }
    }

    fn created(message_id: &str, client_state: &str) -> Notification {
        Notification::message_created("me@example.com", message_id, client_state, "sub-1")
    }

    #[test]
    fn test_validation_echoes_token() {
        let (gate, _) = gate();
        assert_eq!(gate.handle_validation("abc123").unwrap(), "abc123");
        assert_eq!(
            gate.handle_validation(""),
            Err(GateError::EmptyValidationToken)
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_forwarded_once() {
        let (gate, sink) = gate();

        let first = gate
            .handle_notification(&batch(vec![created("msg-1", "secret")]))
            .await
            .unwrap();
        let second = gate
            .handle_notification(&batch(vec![created("msg-1", "secret")]))
            .await
            .unwrap();

        assert_eq!(first.forwarded, 1);
        assert_eq!(second, GateReport { forwarded: 0, duplicates: 1 });
        assert_eq!(sink.message_ids(), vec!["msg-1"]);
    }

    #[tokio::test]
    async fn test_duplicates_inside_one_batch() {
        let (gate, sink) = gate();
        let report = gate
            .handle_notification(&batch(vec![
                created("msg-1", "secret"),
                created("msg-2", "secret"),
                created("msg-1", "secret"),
            ]))
            .await
            .unwrap();

        assert_eq!(report, GateReport { forwarded: 2, duplicates: 1 });
        assert_eq!(sink.message_ids(), vec!["msg-1", "msg-2"]);
    }

    #[tokio::test]
    async fn test_client_state_mismatch_rejects_whole_batch() {
        let (gate, sink) = gate();
        let err = gate
            .handle_notification(&batch(vec![
                created("msg-1", "secret"),
                created("msg-2", "forged"),
            ]))
            .await
            .unwrap_err();

        assert_eq!(err, GateError::ClientStateMismatch { index: 1 });
        assert!(sink.message_ids().is_empty());

        // msg-1 was never recorded, so a valid redelivery still goes through
        let report = gate
            .handle_notification(&batch(vec![created("msg-1", "secret")]))
            .await
            .unwrap();
        assert_eq!(report.forwarded, 1);
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let (gate, sink) = gate();

        let mut no_state = created("msg-1", "secret");
        no_state.client_state = None;
        assert_eq!(
            gate.handle_notification(&batch(vec![no_state])).await,
            Err(GateError::MissingClientState { index: 0 })
        );

        let no_id = Notification {
            client_state: Some("secret".to_string()),
            ..Default::default()
        };
        assert_eq!(
            gate.handle_notification(&batch(vec![no_id])).await,
            Err(GateError::MissingResourceId { index: 0 })
        );

        assert!(sink.message_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_is_processed_again_after_window() {
        let (gate, sink) = gate();
        let delivery = batch(vec![created("msg-1", "secret")]);

        gate.handle_notification(&delivery).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        gate.handle_notification(&delivery).await.unwrap();

        assert_eq!(sink.message_ids(), vec!["msg-1", "msg-1"]);
    }
}
