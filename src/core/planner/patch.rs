//! Local replanning: splice model-proposed tasks into the unresolved region
//! of a running plan.

use super::types::{Plan, PlanTask, ToolWhitelist};
use super::validator::{PlanLimits, validate_plan};
use crate::utils::text::extract_json_object;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchPlan {
    pub reason: String,
    pub replace_task_ids: Vec<String>,
    pub tasks: Vec<PlanTask>,
}

#[derive(Deserialize)]
struct RawPatch {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default, alias = "replaceTaskIds")]
    replace_task_ids: Option<Vec<Value>>,
    #[serde(default)]
    tasks: Option<Vec<PlanTask>>,
}

impl PatchPlan {
    /// Parses model output. Non-string and blank replace ids are dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let json = extract_json_object(raw)?;
        let patch: RawPatch = serde_json::from_str(json).ok()?;
        let replace_task_ids = patch
            .replace_task_ids
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        Some(Self {
            reason: patch.reason.unwrap_or_default().trim().to_string(),
            replace_task_ids,
            tasks: patch.tasks.unwrap_or_default(),
        })
    }
}

/// Why a patch was not merged. `Display` is the reason code carried by the
/// `PLAN_PATCH_REJECTED` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchRejection {
    #[error("plan_or_patch_missing")]
    PlanOrPatchMissing,
    #[error("no_replace_task_ids")]
    NoReplaceTaskIds,
    #[error("patch_tasks_empty")]
    PatchTasksEmpty,
    #[error("patch_task_id_missing")]
    PatchTaskIdMissing,
    #[error("duplicate_task_id_after_patch")]
    DuplicateTaskId(String),
    #[error("patch_plan_invalid:{0}")]
    PlanInvalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPatch {
    pub plan: Plan,
    /// Sorted ids whose tasks (and results) were dropped.
    pub replaced_ids: Vec<String>,
}

/// Drops the replaced tasks from `base`, appends the patch tasks and
/// validates the merged plan. Without explicit replace ids the unresolved
/// ids are replaced.
pub fn apply_patch(
    base: &Plan,
    patch: &PatchPlan,
    unresolved: &[String],
    tool_whitelist: &ToolWhitelist,
    limits: &PlanLimits,
) -> Result<AppliedPatch, PatchRejection> {
    if base.is_empty() {
        return Err(PatchRejection::PlanOrPatchMissing);
    }

    let normalize = |ids: &[String]| -> BTreeSet<String> {
        ids.iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    };
    let mut replace_ids = normalize(&patch.replace_task_ids);
    if replace_ids.is_empty() {
        replace_ids = normalize(unresolved);
    }
    if replace_ids.is_empty() {
        return Err(PatchRejection::NoReplaceTaskIds);
    }
    if patch.tasks.is_empty() {
        return Err(PatchRejection::PatchTasksEmpty);
    }

    let tasks: Vec<PlanTask> = base
        .tasks
        .iter()
        .filter(|task| !replace_ids.contains(&task.id))
        .chain(&patch.tasks)
        .cloned()
        .collect();

    let mut seen = BTreeSet::new();
    for task in &tasks {
        if task.has_blank_id() {
            return Err(PatchRejection::PatchTaskIdMissing);
        }
        if !seen.insert(task.id.as_str()) {
            return Err(PatchRejection::DuplicateTaskId(task.id.clone()));
        }
    }

    let merged = Plan {
        strategy: base.strategy.clone(),
        final_hint: base.final_hint.clone(),
        tasks,
    };
    let validation = validate_plan(&merged, tool_whitelist, limits);
    if !validation.valid {
        return Err(PatchRejection::PlanInvalid(validation.reason));
    }

    Ok(AppliedPatch {
        plan: merged,
        replaced_ids: replace_ids.into_iter().collect(),
    })
}
