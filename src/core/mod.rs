pub mod planner;
pub mod providers;
pub mod subagents;
pub mod tools;
