//! Wave-based parallel execution of one plan pass.
//!
//! Each wave runs every pending task whose dependencies all have a result.
//! A failed dependency still counts as finished: the dependent task runs and
//! sees the failure in its context. Tasks that already have a result, from
//! this pass or a previous process, are never run again.

use super::analyzer::find_cycle;
use super::placeholder::resolve_args;
use super::types::{Plan, PlanTask, TaskKind, TaskResult, TaskResults, ToolWhitelist};
use crate::config::Config;
use crate::core::providers::ChatModel;
use crate::core::subagents::{SubAgentRequest, SubAgentRunner};
use crate::core::tools::{ToolRouter, internal_failure_output, is_tool_error, tool_error_output};
use crate::runtime::observability::{EventSink, RunEvent};
use crate::runtime::state::{RunStateStore, RunnableGate};
use crate::utils::text::preview;
use futures_util::future::join_all;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

pub struct ExecutionRequest<'a> {
    pub run_id: &'a str,
    pub goal: &'a str,
    pub plan: &'a Plan,
    pub tool_whitelist: &'a ToolWhitelist,
    /// Used by `sub_agent` tasks.
    pub model: Arc<dyn ChatModel>,
    /// Results already known for this run; their tasks are skipped.
    pub prior_results: TaskResults,
}

/// Why a pass stopped with tasks still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassHalt {
    /// The gate closed between waves.
    Paused,
    /// Pending tasks exist but none has all dependencies finished.
    Blocked {
        pending: Vec<String>,
        finished: Vec<String>,
        cycle: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPass {
    pub results: TaskResults,
    /// `None` when every task has a result.
    pub halt: Option<PassHalt>,
}

impl ExecutionPass {
    pub fn is_paused(&self) -> bool {
        matches!(self.halt, Some(PassHalt::Paused))
    }

    pub fn blocked_task_ids(&self) -> &[String] {
        match &self.halt {
            Some(PassHalt::Blocked { pending, .. }) => pending,
            _ => &[],
        }
    }
}

pub struct ParallelTaskExecutor {
    tools: Arc<dyn ToolRouter>,
    sub_agents: Arc<SubAgentRunner>,
    store: Arc<dyn RunStateStore>,
    events: Arc<dyn EventSink>,
    gate: Arc<dyn RunnableGate>,
    max_concurrency: usize,
    preview_chars: usize,
    sub_agent_max_steps: u32,
}

impl ParallelTaskExecutor {
    pub fn new(
        config: &Config,
        tools: Arc<dyn ToolRouter>,
        store: Arc<dyn RunStateStore>,
        events: Arc<dyn EventSink>,
        gate: Arc<dyn RunnableGate>,
    ) -> Self {
        let sub_agents = SubAgentRunner::new(Arc::clone(&tools), Arc::clone(&events))
            .with_plan_attempts(config.execution.sub_agent_plan_attempts);
        Self {
            tools,
            sub_agents: Arc::new(sub_agents),
            store,
            events,
            gate,
            max_concurrency: config.execution.max_concurrency.max(1),
            preview_chars: config.execution.context_preview_chars,
            sub_agent_max_steps: config.limits.sub_agent_max_steps.max(1),
        }
    }

    pub fn gate(&self) -> &Arc<dyn RunnableGate> {
        &self.gate
    }

    pub async fn execute(&self, request: ExecutionRequest<'_>) -> crate::Result<ExecutionPass> {
        let run_id = request.run_id;
        let plan = Arc::new(request.plan.clone());
        let shared = Arc::new(WaveShared {
            run_id: run_id.to_string(),
            goal: request.goal.to_string(),
            plan: Arc::clone(&plan),
            tool_whitelist: request.tool_whitelist.clone(),
            model: request.model,
            results: Mutex::new(request.prior_results),
            tools: Arc::clone(&self.tools),
            sub_agents: Arc::clone(&self.sub_agents),
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            preview_chars: self.preview_chars,
            sub_agent_max_steps: self.sub_agent_max_steps,
        });

        let mut wave = 0usize;
        let halt = loop {
            let finished: BTreeSet<String> = shared.lock_results().keys().cloned().collect();
            let mut seen = BTreeSet::new();
            let pending: Vec<&PlanTask> = plan
                .tasks
                .iter()
                .filter(|task| !finished.contains(&task.id) && seen.insert(task.id.as_str()))
                .collect();
            if pending.is_empty() {
                break None;
            }

            if !self.gate.is_runnable(run_id) {
                tracing::info!(run_id = %run_id, pending = pending.len(), "execution paused by gate");
                break Some(PassHalt::Paused);
            }

            let ready: Vec<String> = pending
                .iter()
                .filter(|task| task.depends_on.iter().all(|dep| finished.contains(dep)))
                .map(|task| task.id.clone())
                .collect();

            if ready.is_empty() {
                let pending: Vec<String> = pending.iter().map(|task| task.id.clone()).collect();
                let finished: Vec<String> = finished.into_iter().collect();
                let cycle = find_cycle(&plan);
                tracing::warn!(
                    run_id = %run_id,
                    pending = ?pending,
                    cycle = ?cycle,
                    "no ready tasks, possible cyclic or missing dependencies"
                );
                self.events.append(
                    run_id,
                    &RunEvent::ParallelExecutionBlocked {
                        reason: "no_ready_tasks_possible_cycle".into(),
                        pending_task_ids: pending.clone(),
                        finished_task_ids: finished.clone(),
                        cycle: cycle.clone(),
                    },
                );
                break Some(PassHalt::Blocked {
                    pending,
                    finished,
                    cycle,
                });
            }

            wave += 1;
            self.run_wave(&shared, wave, ready).await?;
        };

        let results = shared.lock_results().clone();
        Ok(ExecutionPass { results, halt })
    }

    async fn run_wave(&self, shared: &Arc<WaveShared>, wave: usize, ready: Vec<String>) -> crate::Result<()> {
        let run_id = shared.run_id.as_str();
        tracing::debug!(run_id = %run_id, wave, tasks = ?ready, "wave.started");
        self.events.append(
            run_id,
            &RunEvent::ParallelWaveStarted {
                wave,
                task_ids: ready.clone(),
            },
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(ready.len());
        for task_id in &ready {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| anyhow::anyhow!("wave semaphore closed: {e}"))?;
            let shared = Arc::clone(shared);
            let task_id = task_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                shared.run_task(&task_id).await;
            }));
        }

        for (task_id, joined) in ready.iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                shared.record_internal_failure(task_id, &e.to_string()).await;
            }
        }

        let (succeeded, failed) = {
            let results = shared.lock_results();
            ready
                .iter()
                .filter_map(|id| results.get(id))
                .fold((0, 0), |(ok, bad), result| {
                    if result.success { (ok + 1, bad) } else { (ok, bad + 1) }
                })
        };
        tracing::info!(run_id = %run_id, wave, succeeded, failed, "wave.completed");
        self.events.append(
            run_id,
            &RunEvent::ParallelWaveCompleted {
                wave,
                succeeded,
                failed,
            },
        );
        Ok(())
    }
}

/// Everything a spawned task needs; owned so workers are `'static`.
struct WaveShared {
    run_id: String,
    goal: String,
    plan: Arc<Plan>,
    tool_whitelist: ToolWhitelist,
    model: Arc<dyn ChatModel>,
    results: Mutex<TaskResults>,
    tools: Arc<dyn ToolRouter>,
    sub_agents: Arc<SubAgentRunner>,
    store: Arc<dyn RunStateStore>,
    events: Arc<dyn EventSink>,
    preview_chars: usize,
    sub_agent_max_steps: u32,
}

impl WaveShared {
    fn lock_results(&self) -> std::sync::MutexGuard<'_, TaskResults> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_task(&self, task_id: &str) {
        let Some(task) = self.plan.task(task_id) else {
            return;
        };
        let run_id = self.run_id.as_str();

        self.events.append(
            run_id,
            &RunEvent::ParallelTaskStarted {
                task_id: task.id.clone(),
                task_type: task.task_type.trim().to_ascii_lowercase(),
                tool: task.tool_name().map(str::to_string),
            },
        );
        if let Err(e) = self.store.mark_task_started(run_id, task_id).await {
            tracing::warn!(run_id = %run_id, task_id = %task_id, "mark_task_started failed: {e}");
        }

        let known = self.lock_results().clone();
        let context = build_context(&self.goal, task, &known, self.preview_chars);
        let result = self.dispatch(task, &context, &known).await;

        self.finish(result).await;
    }

    async fn dispatch(&self, task: &PlanTask, context: &str, known: &TaskResults) -> TaskResult {
        match task.kind() {
            Some(TaskKind::Tool) => self.run_tool(task, known).await,
            Some(TaskKind::SubAgent) => self.run_sub_agent(task, context).await,
            None => {
                let task_type = task.task_type.trim().to_ascii_lowercase();
                TaskResult::failed(
                    &task.id,
                    &task_type,
                    format!("unsupported task type: {task_type}"),
                    internal_failure_output(
                        task.tool_name().unwrap_or_default(),
                        "UNSUPPORTED_TASK_TYPE",
                        "Unsupported task type",
                        json!({ "type": task_type }),
                    ),
                )
            }
        }
    }

    async fn run_tool(&self, task: &PlanTask, known: &TaskResults) -> TaskResult {
        let kind = TaskKind::Tool.to_string();
        let Some(tool) = task.tool_name() else {
            return TaskResult::failed(
                &task.id,
                kind,
                "tool name missing",
                internal_failure_output("", "TOOL_NAME_MISSING", "tool name missing", json!({})),
            );
        };

        let args = match resolve_args(task.args.as_ref(), &task.depends_on, known) {
            Ok(args) => args,
            Err(unresolved) => {
                let message = unresolved.to_string();
                tracing::debug!(
                    run_id = %self.run_id,
                    task_id = %task.id,
                    tool = %tool,
                    placeholders = ?unresolved.0,
                    "task has unresolved placeholders"
                );
                let output = internal_failure_output(
                    tool,
                    "UNRESOLVED_PLACEHOLDER",
                    &message,
                    json!({ "task_id": task.id, "placeholders": unresolved.0 }),
                );
                return TaskResult::failed(&task.id, kind, message, output);
            }
        };

        match self.tools.invoke(tool, &args).await {
            Ok(output) if is_tool_error(&output) => {
                TaskResult::failed(&task.id, kind, output.clone(), output)
            }
            Ok(output) => TaskResult::succeeded(&task.id, kind, output),
            Err(e) => {
                let output = tool_error_output(&e);
                TaskResult::failed(&task.id, kind, output.clone(), output)
            }
        }
    }

    async fn run_sub_agent(&self, task: &PlanTask, context: &str) -> TaskResult {
        let limit = self.sub_agent_max_steps;
        let max_steps = task.max_steps.map_or(limit, |steps| {
            u32::try_from(steps.clamp(1, i64::from(limit))).unwrap_or(limit)
        });
        let request = SubAgentRequest {
            run_id: &self.run_id,
            task_id: &task.id,
            goal: task.goal.as_deref().unwrap_or_default(),
            context,
            tool_whitelist: &self.tool_whitelist,
            max_steps,
        };

        let outcome = self.sub_agents.run(&request, self.model.as_ref()).await;
        let kind = TaskKind::SubAgent.to_string();
        if outcome.success {
            TaskResult::succeeded(&task.id, kind, outcome.answer)
        } else {
            TaskResult::failed(&task.id, kind, outcome.error, outcome.answer)
        }
    }

    async fn finish(&self, result: TaskResult) {
        let run_id = self.run_id.as_str();
        self.lock_results()
            .insert(result.task_id.clone(), result.clone());
        if let Err(e) = self.store.save_task_result(run_id, &result).await {
            tracing::warn!(run_id = %run_id, task_id = %result.task_id, "save_task_result failed: {e}");
        }

        tracing::info!(
            run_id = %run_id,
            task_id = %result.task_id,
            success = result.success,
            "task.finished"
        );
        self.events.append(
            run_id,
            &RunEvent::ParallelTaskFinished {
                task_id: result.task_id.clone(),
                success: result.success,
                output_preview: preview(&result.output, self.preview_chars).to_string(),
            },
        );
    }

    /// A worker that died without recording anything.
    async fn record_internal_failure(&self, task_id: &str, error: &str) {
        let run_id = self.run_id.as_str();
        tracing::error!(run_id = %run_id, task_id = %task_id, "task worker failed: {error}");

        let task = self.plan.task(task_id);
        let tool = task.and_then(PlanTask::tool_name).unwrap_or_default();
        let task_type = task.map(|t| t.task_type.trim().to_ascii_lowercase()).unwrap_or_default();
        let result = TaskResult::failed(
            task_id,
            task_type,
            error,
            internal_failure_output(tool, "INTERNAL_ERROR", error, json!({})),
        );
        self.lock_results()
            .insert(task_id.to_string(), result.clone());
        if let Err(e) = self.store.save_task_result(run_id, &result).await {
            tracing::warn!(run_id = %run_id, task_id = %task_id, "save_task_result failed: {e}");
        }
        self.events.append(
            run_id,
            &RunEvent::ParallelTaskFailedInternal {
                task_id: task_id.to_string(),
                error: error.to_string(),
            },
        );
    }
}

/// Goal plus a one-line summary of each finished dependency.
fn build_context(goal: &str, task: &PlanTask, known: &TaskResults, preview_chars: usize) -> String {
    if task.depends_on.is_empty() {
        return goal.to_string();
    }
    let mut context = format!("{goal}\nDependency results:\n");
    for dep in &task.depends_on {
        if let Some(result) = known.get(dep) {
            let _ = writeln!(
                context,
                "{dep}: {} -> {}",
                result.status_label(),
                preview(&result.output, preview_chars)
            );
        }
    }
    context
}
