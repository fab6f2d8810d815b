use crate::core::planner::analyzer::DagMetrics;
use crate::core::planner::complexity::ComplexityScore;
use crate::core::planner::judge::JudgeSummary;
use crate::core::planner::types::Plan;
use serde::Serialize;
use serde_json::Value;

/// Structured audit trail of one run.
///
/// Sinks consume these fire-and-forget; the scheduler never reads them back.
#[derive(Debug, Clone, Serialize, strum::IntoStaticStr)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEvent {
    // ── Planning ────────────────────────────────────────────────────────
    PlanStarted {
        candidate_count: usize,
    },
    PlanCandidateGenerated {
        index: usize,
        total: usize,
        plan: Plan,
    },
    PlanCandidateFailed {
        index: usize,
        total: usize,
        error: String,
    },
    PlanCandidateJudged {
        index: usize,
        valid: bool,
        validation_reason: String,
        structural_score: f64,
        llm_judge_score: f64,
        complexity: ComplexityScore,
        final_score: f64,
        summary: JudgeSummary,
    },
    PlanSelected {
        index: Option<usize>,
        valid: bool,
        final_score: f64,
        reason: String,
    },
    PlanCreated {
        plan: Plan,
        score: f64,
    },
    PlanInvalid {
        reason: String,
        plan: Plan,
    },
    PlanOverrideUsed {
        plan: Plan,
        valid: bool,
        reason: String,
    },
    PlanReused {
        plan: Plan,
        valid: bool,
        reason: String,
    },
    PlanAnalyzed {
        source: String,
        plan_valid: bool,
        metrics: DagMetrics,
    },

    // ── Wave execution ──────────────────────────────────────────────────
    ParallelWaveStarted {
        wave: usize,
        task_ids: Vec<String>,
    },
    ParallelWaveCompleted {
        wave: usize,
        succeeded: usize,
        failed: usize,
    },
    ParallelTaskStarted {
        task_id: String,
        task_type: String,
        tool: Option<String>,
    },
    ParallelTaskFinished {
        task_id: String,
        success: bool,
        output_preview: String,
    },
    ParallelTaskFailedInternal {
        task_id: String,
        error: String,
    },
    ParallelExecutionBlocked {
        reason: String,
        pending_task_ids: Vec<String>,
        finished_task_ids: Vec<String>,
        cycle: Option<Vec<String>>,
    },

    // ── Sub-agents ──────────────────────────────────────────────────────
    SubAgentPlanRetry {
        task_id: String,
        attempt: u32,
        reason: String,
    },
    SubAgentPlanCreated {
        task_id: String,
        steps_count: usize,
        expected: String,
    },
    SubAgentStepStarted {
        task_id: String,
        step: usize,
        tool: String,
    },
    SubAgentStepFinished {
        task_id: String,
        step: usize,
        tool: String,
        success: bool,
        output_preview: String,
    },
    SubAgentCompleted {
        task_id: String,
        steps_count: usize,
        answer_preview: String,
    },
    SubAgentFailed {
        task_id: String,
        error: String,
        steps_count: usize,
    },

    // ── Local replanning ────────────────────────────────────────────────
    PlanPatchRequested {
        round: u32,
        unresolved_task_ids: Vec<String>,
        blocked_task_ids: Vec<String>,
    },
    PlanPatchCreated {
        round: u32,
        reason: String,
        replace_task_ids: Vec<String>,
        tasks_count: usize,
    },
    PlanPatchRejected {
        round: u32,
        reason: String,
    },
    PlanPatchApplied {
        round: u32,
        replace_task_ids: Vec<String>,
        plan: Plan,
    },
    PlanPatchExhausted {
        replan_count: u32,
        max_local_replans: u32,
        unresolved_task_ids: Vec<String>,
    },
    ExecutionCompleted {
        status: String,
        failure_reason: Option<String>,
        replan_count: u32,
        unresolved_task_ids: Vec<String>,
    },
}

impl RunEvent {
    /// Stable event name, e.g. `PARALLEL_TASK_FINISHED`.
    pub fn event_type(&self) -> &'static str {
        self.into()
    }

    /// Event fields as a JSON object, without the type tag.
    pub fn payload(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("event_type");
        }
        value
    }
}
