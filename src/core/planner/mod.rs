//! DAG plan-and-execute: candidate planning, judging, wave execution and
//! local replanning.

pub mod analyzer;
pub mod complexity;
pub mod dag_executor;
pub mod execution_planner;
pub mod executor;
pub mod judge;
pub mod patch;
pub mod placeholder;
pub mod prompts;
pub mod quality;
pub mod types;
pub mod validator;

pub use analyzer::{DagMetrics, analyze, find_cycle};
pub use complexity::{ComplexityScore, score_complexity};
pub use dag_executor::{
    DagExecutionOutcome, DagExecutionRequest, DagTaskExecutor, ExecutionStatus, FailureReason,
};
pub use execution_planner::{PlanExecutionPlanner, PlanOutcome, PlanRequest, PlanSource};
pub use executor::{ExecutionPass, ExecutionRequest, ParallelTaskExecutor, PassHalt};
pub use judge::{Evaluation, JudgeSummary, PlanJudge};
pub use patch::{AppliedPatch, PatchPlan, PatchRejection, apply_patch};
pub use placeholder::{UnresolvedPlaceholders, resolve_args};
pub use quality::{QualityReport, TaskResultsSummary, build_quality_report};
pub use types::{Plan, PlanTask, TaskKind, TaskResult, TaskResults, ToolWhitelist};
pub use validator::{PlanLimits, ValidationResult, validate_plan};
