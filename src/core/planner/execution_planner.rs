use super::analyzer::{DagMetrics, analyze};
use super::complexity::score_complexity;
use super::judge::{Evaluation, EvaluationRequest, INVALID_PLAN_PENALTY, PlanJudge};
use super::prompts;
use super::types::{Plan, ToolWhitelist};
use super::validator::{PlanLimits, ValidationResult, validate_plan};
use crate::config::Config;
use crate::core::providers::ChatModel;
use crate::runtime::observability::{EventSink, RunEvent};
use crate::runtime::state::RunStateStore;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

/// Where the executed plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlanSource {
    /// Supplied by an operator; consumed once.
    Override,
    /// Persisted by an earlier pass of the same run.
    Stored,
    Generated,
}

pub struct PlanRequest<'a> {
    pub run_id: &'a str,
    pub goal: &'a str,
    pub tool_whitelist: &'a ToolWhitelist,
    pub model: &'a dyn ChatModel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub plan_json: String,
    pub valid: bool,
    pub score: f64,
    pub judge_summary: Value,
    /// Validation reason when `valid` is false; empty otherwise.
    pub failure_reason: String,
    pub source: PlanSource,
    pub metrics: DagMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerSettings {
    pub candidate_count: usize,
    pub complexity_lambda: f64,
    pub structural_weight: f64,
    pub judge_weight: f64,
}

impl From<&Config> for PlannerSettings {
    fn from(config: &Config) -> Self {
        Self {
            candidate_count: config.planning.effective_candidate_count(),
            complexity_lambda: config.planning.complexity_penalty_lambda,
            structural_weight: config.planning.structural_score_weight,
            judge_weight: config.planning.llm_judge_score_weight,
        }
    }
}

struct Candidate {
    index: usize,
    plan: Plan,
    validation: ValidationResult,
    evaluation: Evaluation,
}

/// Produces the plan a run executes: an operator override, the run's stored
/// plan, or the best of several freshly generated candidates.
pub struct PlanExecutionPlanner {
    limits: PlanLimits,
    settings: PlannerSettings,
    judge: PlanJudge,
    store: Arc<dyn RunStateStore>,
    events: Arc<dyn EventSink>,
}

impl PlanExecutionPlanner {
    pub fn new(
        config: &Config,
        judge: PlanJudge,
        store: Arc<dyn RunStateStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            limits: config.limits.plan_limits(),
            settings: PlannerSettings::from(config),
            judge,
            store,
            events,
        }
    }

    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    pub async fn plan(&self, request: PlanRequest<'_>) -> crate::Result<PlanOutcome> {
        let run_id = request.run_id;
        let stored = self.store.load_plan(run_id).await?;
        let stored = stored.filter(|json| !matches!(json.trim(), "" | "{}"));

        let outcome = match stored {
            Some(json) => self.use_stored(&request, &json).await?,
            None => self.generate(&request).await,
        };

        self.store
            .record_plan(run_id, &outcome.plan_json, outcome.valid)
            .await?;

        if outcome.valid {
            self.events.append(
                run_id,
                &RunEvent::PlanCreated {
                    plan: outcome.plan.clone(),
                    score: outcome.score,
                },
            );
        } else {
            self.events.append(
                run_id,
                &RunEvent::PlanInvalid {
                    reason: outcome.failure_reason.clone(),
                    plan: outcome.plan.clone(),
                },
            );
        }

        match outcome.source {
            PlanSource::Override => {
                self.events.append(
                    run_id,
                    &RunEvent::PlanOverrideUsed {
                        plan: outcome.plan.clone(),
                        valid: outcome.valid,
                        reason: outcome.failure_reason.clone(),
                    },
                );
                self.store.clear_plan_override(run_id).await?;
            }
            PlanSource::Stored => self.events.append(
                run_id,
                &RunEvent::PlanReused {
                    plan: outcome.plan.clone(),
                    valid: outcome.valid,
                    reason: outcome.failure_reason.clone(),
                },
            ),
            PlanSource::Generated => {}
        }

        self.events.append(
            run_id,
            &RunEvent::PlanAnalyzed {
                source: outcome.source.to_string(),
                plan_valid: outcome.valid,
                metrics: outcome.metrics,
            },
        );
        tracing::info!(
            run_id = %run_id,
            source = %outcome.source,
            valid = outcome.valid,
            tasks = outcome.metrics.task_count,
            max_parallelism = outcome.metrics.max_parallelism,
            "plan.ready"
        );

        Ok(outcome)
    }

    /// Stored plans are validated but never judged.
    async fn use_stored(&self, request: &PlanRequest<'_>, json: &str) -> crate::Result<PlanOutcome> {
        let is_override = self.store.is_plan_override(request.run_id).await?;
        let source = if is_override {
            PlanSource::Override
        } else {
            PlanSource::Stored
        };
        self.events
            .append(request.run_id, &RunEvent::PlanStarted { candidate_count: 0 });

        let plan = Plan::from_json(json).unwrap_or_else(|e| {
            tracing::warn!(run_id = %request.run_id, source = %source, "stored plan is malformed: {e}");
            Plan::default()
        });
        let validation = validate_plan(&plan, request.tool_whitelist, &self.limits);
        let summary_source = if is_override { "plan_override" } else { "stored_plan" };

        let mut outcome = finish(
            plan,
            &validation,
            0.0,
            json!({ "source": summary_source }),
            source,
        );
        // Stored and override documents are kept as written, even when malformed.
        outcome.plan_json = json.to_string();
        Ok(outcome)
    }

    async fn generate(&self, request: &PlanRequest<'_>) -> PlanOutcome {
        let run_id = request.run_id;
        let total = self.settings.candidate_count.max(1);
        self.events
            .append(run_id, &RunEvent::PlanStarted { candidate_count: total });

        let mut candidates = Vec::with_capacity(total);
        for index in 1..=total {
            if let Some(candidate) = self.propose(request, index, total).await {
                candidates.push(candidate);
            }
        }

        let Some((selected, reason)) = select(candidates) else {
            self.events.append(
                run_id,
                &RunEvent::PlanSelected {
                    index: None,
                    valid: false,
                    final_score: INVALID_PLAN_PENALTY,
                    reason: "no_candidate_generated".into(),
                },
            );
            return finish(
                Plan::default(),
                &ValidationResult::rejected("no_candidate_generated"),
                INVALID_PLAN_PENALTY,
                json!({ "source": "none" }),
                PlanSource::Generated,
            );
        };

        self.events.append(
            run_id,
            &RunEvent::PlanSelected {
                index: Some(selected.index),
                valid: selected.validation.valid,
                final_score: selected.evaluation.final_score,
                reason: reason.into(),
            },
        );
        let judge_summary =
            serde_json::to_value(&selected.evaluation.summary).unwrap_or(Value::Null);
        finish(
            selected.plan,
            &selected.validation,
            selected.evaluation.final_score,
            judge_summary,
            PlanSource::Generated,
        )
    }

    /// One candidate; `None` when the model call fails.
    async fn propose(&self, request: &PlanRequest<'_>, index: usize, total: usize) -> Option<Candidate> {
        let run_id = request.run_id;
        let messages = prompts::candidate_messages(
            request.goal,
            request.tool_whitelist,
            &self.limits,
            index - 1,
            total,
        );

        let started = Instant::now();
        let response = match request.model.generate(&messages).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(run_id = %run_id, index, total, "plan candidate generation failed: {e:#}");
                self.events.append(
                    run_id,
                    &RunEvent::PlanCandidateFailed {
                        index,
                        total,
                        error: format!("{e:#}"),
                    },
                );
                return None;
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            run_id = %run_id,
            index,
            model = request.model.name(),
            duration_ms,
            "plan.candidate"
        );

        let plan = Plan::parse_lenient(&response.text);
        self.events.append(
            run_id,
            &RunEvent::PlanCandidateGenerated {
                index,
                total,
                plan: plan.clone(),
            },
        );

        let validation = validate_plan(&plan, request.tool_whitelist, &self.limits);
        let complexity = score_complexity(&plan, self.settings.complexity_lambda);
        let evaluation = self
            .judge
            .evaluate(EvaluationRequest {
                run_id,
                goal: request.goal,
                plan: &plan,
                validation: &validation,
                complexity_penalty: complexity.penalty,
                structural_weight: self.settings.structural_weight,
                judge_weight: self.settings.judge_weight,
            })
            .await;

        self.events.append(
            run_id,
            &RunEvent::PlanCandidateJudged {
                index,
                valid: evaluation.valid,
                validation_reason: validation.reason.clone(),
                structural_score: evaluation.structural_score,
                llm_judge_score: evaluation.llm_judge_score,
                complexity,
                final_score: evaluation.final_score,
                summary: evaluation.summary.clone(),
            },
        );

        Some(Candidate {
            index,
            plan,
            validation,
            evaluation,
        })
    }
}

/// Best valid candidate, else best overall. Ties keep the earlier candidate,
/// and a NaN score ranks below every number.
fn select(candidates: Vec<Candidate>) -> Option<(Candidate, &'static str)> {
    let rank = |candidate: &Candidate| {
        let score = candidate.evaluation.final_score;
        if score.is_nan() { f64::NEG_INFINITY } else { score }
    };
    let best = |pool: Vec<Candidate>| {
        pool.into_iter().reduce(|best, next| {
            if rank(&next).total_cmp(&rank(&best)).is_gt() {
                next
            } else {
                best
            }
        })
    };

    let (valid, invalid): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| c.validation.valid);
    if valid.is_empty() {
        best(invalid).map(|c| (c, "best_invalid_candidate"))
    } else {
        best(valid).map(|c| (c, "best_valid_candidate"))
    }
}

fn finish(
    plan: Plan,
    validation: &ValidationResult,
    score: f64,
    judge_summary: Value,
    source: PlanSource,
) -> PlanOutcome {
    let metrics = analyze(&plan);
    PlanOutcome {
        plan_json: plan.to_json(),
        plan,
        valid: validation.valid,
        score,
        judge_summary,
        failure_reason: if validation.valid {
            String::new()
        } else {
            validation.reason.clone()
        },
        source,
        metrics,
    }
}
