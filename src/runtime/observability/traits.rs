use super::events::RunEvent;

/// Audit-trail backend for run events.
pub trait EventSink: Send + Sync {
    /// Append one event to the run's trail. Never fails the caller.
    fn append(&self, run_id: &str, event: &RunEvent);

    /// Flush any buffered data (no-op for most backends)
    fn flush(&self) {}

    /// Human-readable name of this sink
    fn name(&self) -> &str;
}
