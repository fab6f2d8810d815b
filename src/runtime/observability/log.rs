use super::events::RunEvent;
use super::traits::EventSink;
use crate::utils::text::truncate_with_ellipsis;
use tracing::{info, warn};

const MAX_LOGGED_PAYLOAD_CHARS: usize = 1_000;

/// Writes each event to `tracing`; failure events log at warn.
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn append(&self, run_id: &str, event: &RunEvent) {
        let payload = truncate_with_ellipsis(&event.payload().to_string(), MAX_LOGGED_PAYLOAD_CHARS);
        match event {
            RunEvent::ParallelExecutionBlocked { .. }
            | RunEvent::ParallelTaskFailedInternal { .. }
            | RunEvent::PlanPatchRejected { .. }
            | RunEvent::PlanPatchExhausted { .. }
            | RunEvent::SubAgentFailed { .. }
            | RunEvent::PlanInvalid { .. } => {
                warn!(run_id = %run_id, event = event.event_type(), payload = %payload, "run.event");
            }
            _ => {
                info!(run_id = %run_id, event = event.event_type(), payload = %payload, "run.event");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
