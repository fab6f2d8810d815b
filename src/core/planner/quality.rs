use super::dag_executor::DagExecutionOutcome;
use super::execution_planner::PlanOutcome;
use super::types::{Plan, TaskResults};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskResultsSummary {
    pub success: usize,
    pub failed: usize,
}

/// Post-run summary of how much of the goal the executed plan covered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub goal_coverage: f64,
    pub unresolved_tasks: Vec<String>,
    pub judge_summary: Value,
    pub replan_count: u32,
    pub plan_score: f64,
    pub task_total: usize,
    pub task_success: usize,
    pub task_results_summary: TaskResultsSummary,
}

impl QualityReport {
    /// Report for a finished run from its planning and execution outcomes.
    pub fn for_run(planned: &PlanOutcome, executed: &DagExecutionOutcome) -> Self {
        build_quality_report(
            &executed.final_plan,
            &executed.task_results,
            &executed.unresolved_task_ids,
            planned.judge_summary.clone(),
            executed.replan_count,
            planned.score,
        )
    }
}

pub fn build_quality_report(
    plan: &Plan,
    results: &TaskResults,
    unresolved: &[String],
    judge_summary: Value,
    replan_count: u32,
    plan_score: f64,
) -> QualityReport {
    let task_total = plan.tasks.len();
    let task_success = task_total.saturating_sub(unresolved.len());
    #[allow(clippy::cast_precision_loss)]
    let goal_coverage = if task_total == 0 {
        if unresolved.is_empty() { 1.0 } else { 0.0 }
    } else {
        task_success as f64 / task_total as f64
    };

    let success = results.values().filter(|result| result.success).count();
    QualityReport {
        goal_coverage,
        unresolved_tasks: unresolved.to_vec(),
        judge_summary,
        replan_count,
        plan_score,
        task_total,
        task_success,
        task_results_summary: TaskResultsSummary {
            success,
            failed: results.len() - success,
        },
    }
}
