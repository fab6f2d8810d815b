pub mod runner;

pub use runner::{SubAgentRequest, SubAgentResult, SubAgentRunner, SubAgentStep};
