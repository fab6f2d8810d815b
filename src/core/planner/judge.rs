//! Candidate scoring: structural validity, complexity and an optional
//! semantic review by a secondary model.

use super::prompts;
use super::types::Plan;
use super::validator::ValidationResult;
use crate::config::JudgeConfig;
use crate::core::providers::{ChatMessage, ChatModelFactory};
use crate::utils::text::extract_json_object;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

/// Added to every invalid candidate's score so it never outranks a valid one.
pub const INVALID_PLAN_PENALTY: f64 = -1000.0;

const COVERAGE_WEIGHT: f64 = 0.6;
const FEASIBILITY_WEIGHT: f64 = 0.4;
const REDUNDANCY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JudgeSummary {
    pub valid: bool,
    pub validation_reason: String,
    pub judge_summary: String,
    pub judge_endpoint: String,
    pub judge_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub valid: bool,
    pub structural_score: f64,
    pub llm_judge_score: f64,
    pub complexity_penalty: f64,
    pub final_score: f64,
    pub summary: JudgeSummary,
}

pub struct EvaluationRequest<'a> {
    pub run_id: &'a str,
    pub goal: &'a str,
    pub plan: &'a Plan,
    pub validation: &'a ValidationResult,
    pub complexity_penalty: f64,
    pub structural_weight: f64,
    pub judge_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct JudgeRoute {
    endpoint: String,
    model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Verdict {
    coverage: f64,
    feasibility: f64,
    redundancy: f64,
}

impl Verdict {
    fn score(self) -> f64 {
        self.coverage.clamp(0.0, 1.0) * COVERAGE_WEIGHT
            + self.feasibility.clamp(0.0, 1.0) * FEASIBILITY_WEIGHT
            - self.redundancy.clamp(0.0, 1.0) * REDUNDANCY_WEIGHT
    }
}

pub struct PlanJudge {
    enabled: bool,
    temperature: f64,
    routes: Vec<JudgeRoute>,
    models: Option<Arc<dyn ChatModelFactory>>,
}

impl PlanJudge {
    pub fn new(config: &JudgeConfig, models: Option<Arc<dyn ChatModelFactory>>) -> Self {
        let routes = config
            .routes
            .iter()
            .filter(|route| !route.endpoint.trim().is_empty())
            .flat_map(|route| {
                route
                    .models
                    .iter()
                    .map(|model| model.trim())
                    .filter(|model| !model.is_empty())
                    .map(|model| JudgeRoute {
                        endpoint: route.endpoint.trim().to_string(),
                        model: model.to_string(),
                    })
            })
            .collect();
        Self {
            enabled: config.enabled,
            temperature: config.temperature,
            routes,
            models,
        }
    }

    /// Rule-only judge; semantic scoring never runs.
    pub fn disabled() -> Self {
        Self::new(&JudgeConfig::default(), None)
    }

    pub async fn evaluate(&self, request: EvaluationRequest<'_>) -> Evaluation {
        let valid = request.validation.valid;
        let mut summary = JudgeSummary {
            valid,
            validation_reason: request.validation.reason.trim().to_string(),
            ..JudgeSummary::default()
        };

        let structural_score = if valid { 1.0 } else { 0.0 };
        let mut llm_judge_score = 0.0;

        if valid {
            match (&self.models, self.enabled && !self.routes.is_empty()) {
                (Some(models), true) => {
                    llm_judge_score = self.semantic_score(models, &request, &mut summary).await;
                }
                _ => summary.judge_summary = "judge_disabled_or_unconfigured".into(),
            }
        } else {
            summary.judge_summary = format!("validation_failed:{}", summary.validation_reason);
        }

        let mut final_score = request.structural_weight * structural_score
            + request.judge_weight * llm_judge_score
            - request.complexity_penalty;
        if !valid {
            final_score += INVALID_PLAN_PENALTY;
        }

        Evaluation {
            valid,
            structural_score,
            llm_judge_score,
            complexity_penalty: request.complexity_penalty,
            final_score,
            summary,
        }
    }

    /// Walks the routes in order and stops at the first that answers.
    async fn semantic_score(
        &self,
        models: &Arc<dyn ChatModelFactory>,
        request: &EvaluationRequest<'_>,
        summary: &mut JudgeSummary,
    ) -> f64 {
        let messages = [
            ChatMessage::system(prompts::judge_system_prompt()),
            ChatMessage::user(prompts::judge_user_prompt(request.goal, request.plan)),
        ];
        let mut failed_routes = Vec::new();

        for route in &self.routes {
            let started = Instant::now();
            let outcome = match models.resolve(&route.endpoint, &route.model, self.temperature) {
                Ok(model) => model.generate(&messages).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(response) => {
                    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    tracing::info!(
                        run_id = %request.run_id,
                        endpoint = %route.endpoint,
                        model = %route.model,
                        duration_ms,
                        tokens = ?response.usage,
                        "plan.judge"
                    );
                    summary.judge_endpoint.clone_from(&route.endpoint);
                    summary.judge_model.clone_from(&route.model);
                    return match parse_verdict(&response.text) {
                        Some((verdict, text)) => {
                            summary.judge_summary = text;
                            verdict.score()
                        }
                        None => {
                            summary.judge_summary = "judge_output_unparseable".into();
                            0.0
                        }
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %request.run_id,
                        endpoint = %route.endpoint,
                        model = %route.model,
                        "Plan judge route failed: {e}"
                    );
                    failed_routes.push(json!({
                        "endpoint": route.endpoint,
                        "model": route.model,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        summary.judge_summary = format!(
            "judge_llm_all_routes_failed:{}",
            Value::Array(failed_routes)
        );
        0.0
    }
}

fn parse_verdict(raw: &str) -> Option<(Verdict, String)> {
    let value: Value = serde_json::from_str(extract_json_object(raw)?).ok()?;
    let verdict = Verdict {
        coverage: number(&value["coverage_score"]),
        feasibility: number(&value["feasibility_score"]),
        redundancy: number(&value["redundancy_penalty"]),
    };
    let text = value["summary"].as_str().unwrap_or_default().trim().to_string();
    Some((verdict, text))
}

/// Finite numbers or numeric strings; anything else is 0.
fn number(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}
