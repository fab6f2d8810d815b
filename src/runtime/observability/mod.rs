pub mod events;
pub mod log;
pub mod memory;
pub mod multi;
pub mod noop;
pub mod traits;

pub use self::log::LogEventSink;
pub use events::RunEvent;
pub use memory::{RecordedEvent, RecordingEventSink};
pub use multi::MultiEventSink;
pub use noop::NoopEventSink;
pub use traits::EventSink;

use crate::config::ObservabilityConfig;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Factory: create the right event sink from config
pub fn create_event_sink(config: &ObservabilityConfig) -> Arc<dyn EventSink> {
    match config.backend.as_str() {
        "log" => Arc::new(LogEventSink::new()),
        "memory" => Arc::new(RecordingEventSink::new()),
        "none" | "noop" => Arc::new(NoopEventSink),
        _ => {
            tracing::warn!(
                "Unknown observability backend '{}', falling back to noop",
                config.backend
            );
            Arc::new(NoopEventSink)
        }
    }
}

/// Installs the global fmt subscriber. Later calls are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global subscriber already installed");
    }
}
