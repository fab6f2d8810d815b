pub mod gate;
pub mod store;

pub use gate::{AlwaysRunnable, RunControl, RunStatus, RunnableGate};
pub use store::{InMemoryRunStateStore, ReplanState, RunStateStore, StateFuture};
