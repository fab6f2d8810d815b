use super::events::RunEvent;
use super::traits::EventSink;

/// Sink that drops every event.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    #[inline(always)]
    fn append(&self, _run_id: &str, _event: &RunEvent) {}

    fn name(&self) -> &str {
        "noop"
    }
}
