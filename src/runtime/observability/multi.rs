use super::events::RunEvent;
use super::traits::EventSink;
use std::sync::Arc;

/// Fans every event out to each inner sink in order.
pub struct MultiEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for MultiEventSink {
    fn append(&self, run_id: &str, event: &RunEvent) {
        for sink in &self.sinks {
            sink.append(run_id, event);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }

    fn name(&self) -> &str {
        "multi"
    }
}
