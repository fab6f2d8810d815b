use super::types::{Plan, TaskKind, ToolWhitelist};
use serde::Serialize;
use std::collections::BTreeSet;

/// Hard ceilings applied when a plan or a patched plan is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_tasks: usize,
    pub sub_agent_max_steps: u32,
    /// `None` or `Some(0)` means unlimited.
    pub max_parallel_tasks: Option<usize>,
    /// `None` or `Some(0)` means unlimited.
    pub max_sub_agents: Option<usize>,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_tasks: 6,
            sub_agent_max_steps: 6,
            max_parallel_tasks: None,
            max_sub_agents: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: String,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: String::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Structural rule check. First failing rule wins.
pub fn validate_plan(
    plan: &Plan,
    tool_whitelist: &ToolWhitelist,
    limits: &PlanLimits,
) -> ValidationResult {
    match check(plan, tool_whitelist, limits) {
        Ok(()) => ValidationResult::ok(),
        Err(reason) => ValidationResult::rejected(reason),
    }
}

fn check(plan: &Plan, tool_whitelist: &ToolWhitelist, limits: &PlanLimits) -> Result<(), String> {
    if plan.tasks.is_empty() {
        return Err("plan has no tasks".into());
    }
    if plan.tasks.len() > limits.max_tasks {
        return Err(format!(
            "plan exceeds max tasks: {} > {}",
            plan.tasks.len(),
            limits.max_tasks
        ));
    }

    let mut ids = BTreeSet::new();
    let mut parallel_count = 0usize;
    let mut sub_agent_count = 0usize;

    for task in &plan.tasks {
        if task.has_blank_id() {
            return Err("task id missing".into());
        }
        if !ids.insert(task.id.as_str()) {
            return Err(format!("duplicate task id: {}", task.id));
        }
        let Some(kind) = task.kind() else {
            return Err(format!("unsupported task type: {}", task.task_type.trim()));
        };
        if task.depends_on.is_empty() {
            parallel_count += 1;
        }

        match kind {
            TaskKind::Tool => {
                let Some(tool) = task.tool_name() else {
                    return Err("tool name missing".into());
                };
                if !tool_whitelist.contains(tool) {
                    return Err(format!("tool not allowed: {tool}"));
                }
            }
            TaskKind::SubAgent => {
                if task.goal_text().is_none() {
                    return Err("sub_agent goal missing".into());
                }
                if let Some(steps) = task.max_steps
                    && steps > i64::from(limits.sub_agent_max_steps)
                {
                    return Err(format!(
                        "sub_agent max_steps exceeds limit: {steps} > {}",
                        limits.sub_agent_max_steps
                    ));
                }
                sub_agent_count += 1;
            }
        }

        if task.depends_on.iter().any(|dep| dep == &task.id) {
            return Err(format!("task depends on itself: {}", task.id));
        }
    }

    if let Some(max) = limits.max_parallel_tasks.filter(|max| *max > 0)
        && parallel_count > max
    {
        return Err(format!(
            "parallel tasks exceed limit: {parallel_count} > {max}"
        ));
    }
    if let Some(max) = limits.max_sub_agents.filter(|max| *max > 0)
        && sub_agent_count > max
    {
        return Err(format!(
            "sub_agent tasks exceed limit: {sub_agent_count} > {max}"
        ));
    }

    for task in &plan.tasks {
        if let Some(dep) = task.depends_on.iter().find(|dep| !ids.contains(dep.as_str())) {
            return Err(format!("unknown dependency: {dep}"));
        }
    }

    Ok(())
}
