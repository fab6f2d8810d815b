//! Bounded delegate for `sub_agent` tasks.
//!
//! A sub-agent never branches: it asks the model for a short linear list of
//! tool steps, runs them in order, then asks the model to condense the step
//! outputs into one answer for the parent plan.

use crate::core::planner::prompts;
use crate::core::planner::types::ToolWhitelist;
use crate::core::providers::ChatModel;
use crate::core::tools::{ToolRouter, is_tool_error, tool_error_output};
use crate::runtime::observability::{EventSink, RunEvent};
use crate::utils::text::{PREVIEW_CHARS, extract_json_object, preview};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Step tool names that never refer to a real tool.
const PSEUDO_TOOLS: [&str; 4] = ["sub_agent", "workflow", "tool", "agent"];

pub const DEFAULT_PLAN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct SubAgentRequest<'a> {
    pub run_id: &'a str,
    pub task_id: &'a str,
    pub goal: &'a str,
    /// Parent goal plus dependency results.
    pub context: &'a str,
    pub tool_whitelist: &'a ToolWhitelist,
    pub max_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubAgentStep {
    pub tool: String,
    pub args: Map<String, Value>,
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubAgentResult {
    pub success: bool,
    pub answer: String,
    pub error: String,
    pub steps: Vec<SubAgentStep>,
}

#[derive(Debug, Deserialize)]
struct StepPlan {
    #[serde(default)]
    steps: Option<Vec<PlannedStep>>,
    #[serde(default)]
    expected: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedStep {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepPlanRejection {
    MissingSteps,
    TooManySteps(usize),
    InvalidTools(Vec<String>),
}

impl StepPlanRejection {
    fn reason(&self) -> String {
        match self {
            Self::MissingSteps => "sub_agent plan missing steps".into(),
            Self::TooManySteps(_) => "sub_agent steps exceed max".into(),
            Self::InvalidTools(tools) => format!(
                "sub_agent tool not allowed: {}",
                tools.first().map_or("", String::as_str)
            ),
        }
    }

    fn retry_hint(&self, max_steps: u32) -> String {
        match self {
            Self::MissingSteps => {
                "The previous output had no steps array. Output JSON with a non-empty steps array."
                    .into()
            }
            Self::TooManySteps(count) => format!(
                "The previous plan had {count} steps. Keep steps within {max_steps}."
            ),
            Self::InvalidTools(tools) => format!(
                "The previous plan used tools that are not allowed: {}. \
                 Do not use pseudo tool names such as sub_agent, workflow or tool; \
                 use only names from the allowed list.",
                tools.join(", ")
            ),
        }
    }
}

pub struct SubAgentRunner {
    tools: Arc<dyn ToolRouter>,
    events: Arc<dyn EventSink>,
    plan_attempts: u32,
}

impl SubAgentRunner {
    pub fn new(tools: Arc<dyn ToolRouter>, events: Arc<dyn EventSink>) -> Self {
        Self {
            tools,
            events,
            plan_attempts: DEFAULT_PLAN_ATTEMPTS,
        }
    }

    pub fn with_plan_attempts(mut self, plan_attempts: u32) -> Self {
        self.plan_attempts = plan_attempts.max(1);
        self
    }

    /// Never returns an error: every failure is reported in the result,
    /// along with the steps that did run.
    pub async fn run(&self, request: &SubAgentRequest<'_>, model: &dyn ChatModel) -> SubAgentResult {
        let goal = request.goal.trim();
        if goal.is_empty() {
            return self.fail(request, "sub_agent goal missing".into(), Vec::new());
        }

        let mut steps = Vec::new();
        match self.plan_and_execute(request, goal, model, &mut steps).await {
            Ok(answer) => {
                tracing::info!(
                    run_id = %request.run_id,
                    task_id = %request.task_id,
                    steps = steps.len(),
                    "sub_agent.completed"
                );
                self.events.append(
                    request.run_id,
                    &RunEvent::SubAgentCompleted {
                        task_id: request.task_id.to_string(),
                        steps_count: steps.len(),
                        answer_preview: preview(&answer, PREVIEW_CHARS).to_string(),
                    },
                );
                SubAgentResult {
                    success: true,
                    answer,
                    error: String::new(),
                    steps,
                }
            }
            Err(e) => self.fail(request, format!("{e:#}"), steps),
        }
    }

    async fn plan_and_execute(
        &self,
        request: &SubAgentRequest<'_>,
        goal: &str,
        model: &dyn ChatModel,
        steps: &mut Vec<SubAgentStep>,
    ) -> Result<String> {
        let planned = self.request_step_plan(request, goal, model).await?;

        for (index, (tool, args)) in planned.into_iter().enumerate() {
            self.events.append(
                request.run_id,
                &RunEvent::SubAgentStepStarted {
                    task_id: request.task_id.to_string(),
                    step: index,
                    tool: tool.clone(),
                },
            );

            let output = match self.tools.invoke(&tool, &args).await {
                Ok(output) => output,
                Err(e) => tool_error_output(e),
            };
            let success = !is_tool_error(&output);
            if !success {
                tracing::warn!(
                    run_id = %request.run_id,
                    task_id = %request.task_id,
                    tool = %tool,
                    "sub_agent step tool failed"
                );
            }
            self.events.append(
                request.run_id,
                &RunEvent::SubAgentStepFinished {
                    task_id: request.task_id.to_string(),
                    step: index,
                    tool: tool.clone(),
                    success,
                    output_preview: preview(&output, PREVIEW_CHARS).to_string(),
                },
            );
            steps.push(SubAgentStep { tool, args, output });
        }

        let steps_json = serde_json::to_string(steps).context("serialize sub_agent steps")?;
        let response = model
            .generate(&prompts::sub_agent_summary_messages(goal, &steps_json))
            .await
            .context("sub_agent summary failed")?;
        let answer = response.text.trim();
        if answer.is_empty() {
            bail!("sub_agent summary empty");
        }
        Ok(answer.to_string())
    }

    /// Asks for a step plan until one passes vetting or attempts run out.
    async fn request_step_plan(
        &self,
        request: &SubAgentRequest<'_>,
        goal: &str,
        model: &dyn ChatModel,
    ) -> Result<Vec<(String, Map<String, Value>)>> {
        let max_steps = request.max_steps.max(1);
        let mut retry_hint = String::new();
        let mut last_reason = String::from("sub_agent plan generation failed");

        for attempt in 1..=self.plan_attempts {
            let messages = prompts::sub_agent_plan_messages(
                goal,
                request.context,
                request.tool_whitelist,
                max_steps,
                &retry_hint,
            );
            let response = model
                .generate(&messages)
                .await
                .context("sub_agent plan request failed")?;

            match vet_step_plan(&response.text, request.tool_whitelist, max_steps) {
                Ok((steps, expected)) => {
                    self.events.append(
                        request.run_id,
                        &RunEvent::SubAgentPlanCreated {
                            task_id: request.task_id.to_string(),
                            steps_count: steps.len(),
                            expected,
                        },
                    );
                    return Ok(steps);
                }
                Err(rejection) => {
                    last_reason = rejection.reason();
                    retry_hint = rejection.retry_hint(max_steps);
                    tracing::debug!(
                        run_id = %request.run_id,
                        task_id = %request.task_id,
                        attempt,
                        reason = %last_reason,
                        "sub_agent plan rejected"
                    );
                    self.events.append(
                        request.run_id,
                        &RunEvent::SubAgentPlanRetry {
                            task_id: request.task_id.to_string(),
                            attempt,
                            reason: last_reason.clone(),
                        },
                    );
                }
            }
        }

        bail!(last_reason)
    }

    fn fail(
        &self,
        request: &SubAgentRequest<'_>,
        error: String,
        steps: Vec<SubAgentStep>,
    ) -> SubAgentResult {
        tracing::warn!(
            run_id = %request.run_id,
            task_id = %request.task_id,
            error = %error,
            "sub_agent.failed"
        );
        self.events.append(
            request.run_id,
            &RunEvent::SubAgentFailed {
                task_id: request.task_id.to_string(),
                error: error.clone(),
                steps_count: steps.len(),
            },
        );
        SubAgentResult {
            success: false,
            answer: String::new(),
            error,
            steps,
        }
    }
}

type VettedSteps = (Vec<(String, Map<String, Value>)>, String);

fn vet_step_plan(
    raw: &str,
    whitelist: &ToolWhitelist,
    max_steps: u32,
) -> std::result::Result<VettedSteps, StepPlanRejection> {
    let plan: StepPlan = extract_json_object(raw)
        .and_then(|json| serde_json::from_str(json).ok())
        .ok_or(StepPlanRejection::MissingSteps)?;
    let steps = plan
        .steps
        .filter(|steps| !steps.is_empty())
        .ok_or(StepPlanRejection::MissingSteps)?;
    if steps.len() > max_steps as usize {
        return Err(StepPlanRejection::TooManySteps(steps.len()));
    }

    let mut invalid: Vec<String> = Vec::new();
    for step in &steps {
        let tool = step.tool.as_deref().unwrap_or_default().trim();
        let allowed = !PSEUDO_TOOLS.contains(&tool) && whitelist.contains(tool);
        if !allowed && !invalid.iter().any(|seen| seen == tool) {
            invalid.push(tool.to_string());
        }
    }
    if !invalid.is_empty() {
        return Err(StepPlanRejection::InvalidTools(invalid));
    }

    let vetted = steps
        .into_iter()
        .map(|step| {
            let tool = step.tool.unwrap_or_default().trim().to_string();
            let args = match step.args {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            (tool, args)
        })
        .collect();
    Ok((vetted, plan.expected.unwrap_or_default()))
}
