//! Outer execution loop: run a pass, then finish, pause, or patch the
//! unresolved region and run again.

use super::executor::{ExecutionRequest, ParallelTaskExecutor};
use super::patch::{PatchPlan, apply_patch};
use super::prompts;
use super::types::{Plan, TaskResults, ToolWhitelist};
use super::validator::PlanLimits;
use crate::config::Config;
use crate::core::providers::ChatModel;
use crate::runtime::observability::{EventSink, RunEvent};
use crate::runtime::state::{ReplanState, RunStateStore};
use serde::Serialize;
use std::sync::Arc;

pub struct DagExecutionRequest<'a> {
    pub run_id: &'a str,
    pub goal: &'a str,
    pub plan: Plan,
    pub tool_whitelist: &'a ToolWhitelist,
    pub model: Arc<dyn ChatModel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Paused,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    FinalAnswerBlank,
    FinalAnswerFailed,
    LocalReplanExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DagExecutionOutcome {
    pub status: ExecutionStatus,
    pub failure_reason: Option<FailureReason>,
    pub final_answer: String,
    /// The plan as last patched.
    pub final_plan: Plan,
    pub task_results: TaskResults,
    pub replan_count: u32,
    pub unresolved_task_ids: Vec<String>,
    /// Pending tasks of the last pass that had no runnable dependencies.
    pub blocked_task_ids: Vec<String>,
}

impl DagExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

enum RunState {
    Executing,
    ReplanningPending,
    Paused,
    Succeeded(String),
    Failed(FailureReason),
}

pub struct DagTaskExecutor {
    executor: ParallelTaskExecutor,
    store: Arc<dyn RunStateStore>,
    events: Arc<dyn EventSink>,
    limits: PlanLimits,
    max_local_replans: u32,
}

impl DagTaskExecutor {
    pub fn new(
        config: &Config,
        executor: ParallelTaskExecutor,
        store: Arc<dyn RunStateStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            executor,
            store,
            events,
            limits: config.limits.plan_limits(),
            max_local_replans: config.planning.effective_max_local_replans(),
        }
    }

    /// Only store failures surface as errors; every other problem ends in a
    /// `Failed` outcome or another replan round.
    pub async fn execute(
        &self,
        mut request: DagExecutionRequest<'_>,
    ) -> crate::Result<DagExecutionOutcome> {
        let run_id = request.run_id;
        let mut plan = std::mem::take(&mut request.plan);
        let mut results = self.store.load_task_results(run_id).await?;
        let prior = self.store.load_replan_state(run_id).await?;
        let mut replan_count = prior.replan_count;
        let mut unresolved = prior.unresolved_task_ids;
        let mut blocked = Vec::new();
        let mut state = RunState::Executing;

        let (status, failure_reason, final_answer) = loop {
            state = match state {
                RunState::Executing => {
                    let pass = self
                        .executor
                        .execute(ExecutionRequest {
                            run_id,
                            goal: request.goal,
                            plan: &plan,
                            tool_whitelist: request.tool_whitelist,
                            model: Arc::clone(&request.model),
                            prior_results: std::mem::take(&mut results),
                        })
                        .await?;
                    blocked = pass.blocked_task_ids().to_vec();
                    let paused = pass.is_paused() || !self.executor.gate().is_runnable(run_id);
                    results = pass.results;
                    unresolved = plan.unresolved_task_ids(&results);
                    self.record_replan_state(run_id, replan_count, &unresolved).await?;

                    if paused {
                        RunState::Paused
                    } else if unresolved.is_empty() {
                        self.compose_answer(&request, &plan, &results).await
                    } else if replan_count >= self.max_local_replans {
                        tracing::warn!(
                            run_id = %run_id,
                            replan_count,
                            unresolved = ?unresolved,
                            "local replans exhausted"
                        );
                        self.events.append(
                            run_id,
                            &RunEvent::PlanPatchExhausted {
                                replan_count,
                                max_local_replans: self.max_local_replans,
                                unresolved_task_ids: unresolved.clone(),
                            },
                        );
                        RunState::Failed(FailureReason::LocalReplanExhausted)
                    } else {
                        RunState::ReplanningPending
                    }
                }
                RunState::ReplanningPending => {
                    replan_count += 1;
                    self.replan(
                        &request,
                        replan_count,
                        &mut plan,
                        &mut results,
                        &unresolved,
                        &blocked,
                    )
                    .await?;
                    self.record_replan_state(run_id, replan_count, &unresolved).await?;
                    RunState::Executing
                }
                RunState::Paused => break (ExecutionStatus::Paused, None, String::new()),
                RunState::Succeeded(answer) => break (ExecutionStatus::Succeeded, None, answer),
                RunState::Failed(reason) => {
                    break (ExecutionStatus::Failed, Some(reason), String::new());
                }
            };
        };

        tracing::info!(
            run_id = %run_id,
            status = %status,
            replan_count,
            unresolved = unresolved.len(),
            "execution.completed"
        );
        self.events.append(
            run_id,
            &RunEvent::ExecutionCompleted {
                status: status.to_string(),
                failure_reason: failure_reason.map(|reason| reason.to_string()),
                replan_count,
                unresolved_task_ids: unresolved.clone(),
            },
        );

        Ok(DagExecutionOutcome {
            status,
            failure_reason,
            final_answer,
            final_plan: plan,
            task_results: results,
            replan_count,
            unresolved_task_ids: unresolved,
            blocked_task_ids: blocked,
        })
    }

    async fn record_replan_state(
        &self,
        run_id: &str,
        replan_count: u32,
        unresolved: &[String],
    ) -> crate::Result<()> {
        let state = ReplanState {
            replan_count,
            unresolved_task_ids: unresolved.to_vec(),
        };
        self.store.record_replan_state(run_id, &state).await?;
        Ok(())
    }

    async fn compose_answer(
        &self,
        request: &DagExecutionRequest<'_>,
        plan: &Plan,
        results: &TaskResults,
    ) -> RunState {
        let messages = prompts::final_answer_messages(request.goal, &plan.final_hint, results);
        match request.model.generate(&messages).await {
            Ok(response) if response.text.trim().is_empty() => {
                tracing::warn!(run_id = %request.run_id, "final answer is blank");
                RunState::Failed(FailureReason::FinalAnswerBlank)
            }
            Ok(response) => RunState::Succeeded(response.text.trim().to_string()),
            Err(e) => {
                tracing::warn!(run_id = %request.run_id, "final answer generation failed: {e:#}");
                RunState::Failed(FailureReason::FinalAnswerFailed)
            }
        }
    }

    /// One patch round. Rejections are reported as events and leave the
    /// plan untouched.
    async fn replan(
        &self,
        request: &DagExecutionRequest<'_>,
        round: u32,
        plan: &mut Plan,
        results: &mut TaskResults,
        unresolved: &[String],
        blocked: &[String],
    ) -> crate::Result<()> {
        let run_id = request.run_id;
        self.events.append(
            run_id,
            &RunEvent::PlanPatchRequested {
                round,
                unresolved_task_ids: unresolved.to_vec(),
                blocked_task_ids: blocked.to_vec(),
            },
        );

        let messages = prompts::patch_messages(
            request.goal,
            plan,
            unresolved,
            blocked,
            results,
            request.tool_whitelist,
        );
        let patch = match request.model.generate(&messages).await {
            Ok(response) => PatchPlan::parse(&response.text),
            Err(e) => {
                tracing::warn!(run_id = %run_id, round, "patch generation failed: {e:#}");
                None
            }
        };
        let Some(patch) = patch.filter(|patch| !patch.tasks.is_empty()) else {
            self.reject(run_id, round, "empty_patch_tasks".into());
            return Ok(());
        };

        self.events.append(
            run_id,
            &RunEvent::PlanPatchCreated {
                round,
                reason: patch.reason.clone(),
                replace_task_ids: patch.replace_task_ids.clone(),
                tasks_count: patch.tasks.len(),
            },
        );

        let applied = match apply_patch(plan, &patch, unresolved, request.tool_whitelist, &self.limits) {
            Ok(applied) => applied,
            Err(rejection) => {
                self.reject(run_id, round, rejection.to_string());
                return Ok(());
            }
        };

        *plan = applied.plan;
        self.store.record_plan(run_id, &plan.to_json(), true).await?;

        let stale: Vec<String> = results
            .keys()
            .filter(|id| applied.replaced_ids.contains(*id) || !plan.contains_task(id))
            .cloned()
            .collect();
        if !stale.is_empty() {
            for id in &stale {
                results.remove(id);
            }
            self.store.remove_task_results(run_id, &stale).await?;
        }

        tracing::info!(
            run_id = %run_id,
            round,
            replaced = ?applied.replaced_ids,
            dropped_results = stale.len(),
            "plan.patch.applied"
        );
        self.events.append(
            run_id,
            &RunEvent::PlanPatchApplied {
                round,
                replace_task_ids: applied.replaced_ids,
                plan: plan.clone(),
            },
        );
        Ok(())
    }

    fn reject(&self, run_id: &str, round: u32, reason: String) {
        tracing::warn!(run_id = %run_id, round, reason = %reason, "plan patch rejected");
        self.events
            .append(run_id, &RunEvent::PlanPatchRejected { round, reason });
    }
}
