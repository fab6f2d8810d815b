pub mod loader;
pub mod schema;

pub use schema::{
    Config, ExecutionConfig, JudgeConfig, JudgeRouteConfig, LimitsConfig, ObservabilityConfig,
    PlanningConfig,
};
