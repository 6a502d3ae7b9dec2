use std::sync::Arc;

use super::pipeline::{Outcome, Pipeline};
use crate::gate::{EventSink, NotificationEvent};

/// Runs each accepted event on its own tokio task
pub struct SpawnSink {
    pipeline: Arc<Pipeline>,
}

impl SpawnSink {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

impl EventSink for SpawnSink {
    fn dispatch(&self, event: NotificationEvent) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            if let Outcome::Abandoned { stage, .. } = pipeline.process(event).await {
                tracing::debug!("Event abandoned at {:?}", stage);
            }
        });
    }
}
