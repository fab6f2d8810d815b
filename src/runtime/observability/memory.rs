use super::events::RunEvent;
use super::traits::EventSink;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub run_id: String,
    pub event_type: &'static str,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Keeps every event in memory for inspection.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event types in append order.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|event| event.event_type)
            .collect()
    }

    pub fn events_of(&self, event_type: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events_of(event_type).len()
    }
}

impl EventSink for RecordingEventSink {
    fn append(&self, run_id: &str, event: &RunEvent) {
        let recorded = RecordedEvent {
            run_id: run_id.to_string(),
            event_type: event.event_type(),
            payload: event.payload(),
            recorded_at: Utc::now(),
        };
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(recorded);
    }

    fn name(&self) -> &str {
        "memory"
    }
}
