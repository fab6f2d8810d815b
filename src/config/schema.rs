use crate::core::planner::validator::PlanLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_CANDIDATE_PLANS: usize = 1;
pub const MAX_CANDIDATE_PLANS: usize = 5;
pub const MIN_LOCAL_REPLANS: u32 = 1;
pub const MAX_LOCAL_REPLANS: u32 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where this config was loaded from; not persisted.
    #[serde(skip)]
    pub config_path: PathBuf,
    #[serde(default)]
    pub planning: PlanningConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Planning ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    #[serde(default = "default_candidate_plan_count")]
    pub candidate_plan_count: usize,
    #[serde(default = "default_complexity_penalty_lambda")]
    pub complexity_penalty_lambda: f64,
    #[serde(default = "default_score_weight")]
    pub structural_score_weight: f64,
    #[serde(default = "default_score_weight")]
    pub llm_judge_score_weight: f64,
    #[serde(default = "default_max_local_replans")]
    pub max_local_replans: u32,
}

fn default_candidate_plan_count() -> usize {
    3
}

fn default_complexity_penalty_lambda() -> f64 {
    0.25
}

fn default_score_weight() -> f64 {
    1.0
}

fn default_max_local_replans() -> u32 {
    2
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            candidate_plan_count: default_candidate_plan_count(),
            complexity_penalty_lambda: default_complexity_penalty_lambda(),
            structural_score_weight: default_score_weight(),
            llm_judge_score_weight: default_score_weight(),
            max_local_replans: default_max_local_replans(),
        }
    }
}

impl PlanningConfig {
    pub fn effective_candidate_count(&self) -> usize {
        self.candidate_plan_count
            .clamp(MIN_CANDIDATE_PLANS, MAX_CANDIDATE_PLANS)
    }

    pub fn effective_max_local_replans(&self) -> u32 {
        self.max_local_replans
            .clamp(MIN_LOCAL_REPLANS, MAX_LOCAL_REPLANS)
    }
}

// ── Limits ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default = "default_sub_agent_max_steps")]
    pub sub_agent_max_steps: u32,
    /// Zero or negative disables the check.
    #[serde(default = "default_unlimited")]
    pub max_parallel_tasks: i64,
    /// Zero or negative disables the check.
    #[serde(default = "default_unlimited")]
    pub max_sub_agents: i64,
}

fn default_max_tasks() -> usize {
    6
}

fn default_sub_agent_max_steps() -> u32 {
    6
}

fn default_unlimited() -> i64 {
    -1
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
            sub_agent_max_steps: default_sub_agent_max_steps(),
            max_parallel_tasks: default_unlimited(),
            max_sub_agents: default_unlimited(),
        }
    }
}

impl LimitsConfig {
    pub fn plan_limits(&self) -> PlanLimits {
        let positive = |value: i64| usize::try_from(value).ok().filter(|value| *value > 0);
        PlanLimits {
            max_tasks: self.max_tasks,
            sub_agent_max_steps: self.sub_agent_max_steps,
            max_parallel_tasks: positive(self.max_parallel_tasks),
            max_sub_agents: positive(self.max_sub_agents),
        }
    }
}

// ── Judge ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub temperature: f64,
    /// Tried in order; each endpoint's models are tried in order.
    #[serde(default)]
    pub routes: Vec<JudgeRouteConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeRouteConfig {
    pub endpoint: String,
    #[serde(default)]
    pub models: Vec<String>,
}

// ── Execution ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_context_preview_chars")]
    pub context_preview_chars: usize,
    #[serde(default = "default_sub_agent_plan_attempts")]
    pub sub_agent_plan_attempts: u32,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_context_preview_chars() -> usize {
    300
}

fn default_sub_agent_plan_attempts() -> u32 {
    3
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            context_preview_chars: default_context_preview_chars(),
            sub_agent_plan_attempts: default_sub_agent_plan_attempts(),
        }
    }
}

// ── Observability ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "none" | "log" | "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_backend() -> String {
    "log".into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            log_level: default_log_level(),
        }
    }
}
