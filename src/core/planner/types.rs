use crate::error::PlanError;
use crate::utils::text::extract_json_object;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Completed task results keyed by task id.
pub type TaskResults = BTreeMap<String, TaskResult>;

/// Tools a plan is allowed to call.
pub type ToolWhitelist = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    Tool,
    SubAgent,
}

impl TaskKind {
    /// Parses the raw `type` field; case and surrounding whitespace are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tool" => Some(Self::Tool),
            "sub_agent" => Some(Self::SubAgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default, deserialize_with = "null_as_default")]
    pub strategy: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub final_hint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTask {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "dedup_ids")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PlanTask {
    pub fn tool(id: impl Into<String>, tool: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            task_type: TaskKind::Tool.to_string(),
            tool: Some(tool.into()),
            args: Some(args),
            ..Self::default()
        }
    }

    pub fn sub_agent(id: impl Into<String>, goal: impl Into<String>, max_steps: i64) -> Self {
        Self {
            id: id.into(),
            task_type: TaskKind::SubAgent.to_string(),
            goal: Some(goal.into()),
            max_steps: Some(max_steps),
            ..Self::default()
        }
    }

    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = dedup_preserving_order(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn kind(&self) -> Option<TaskKind> {
        TaskKind::parse(&self.task_type)
    }

    pub fn has_blank_id(&self) -> bool {
        self.id.trim().is_empty()
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }

    pub fn goal_text(&self) -> Option<&str> {
        self.goal.as_deref().map(str::trim).filter(|goal| !goal.is_empty())
    }
}

impl Plan {
    pub fn new(tasks: Vec<PlanTask>) -> Self {
        Self {
            tasks,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn with_final_hint(mut self, final_hint: impl Into<String>) -> Self {
        self.final_hint = final_hint.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// First task with the given id.
    pub fn task(&self, id: &str) -> Option<&PlanTask> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn contains_task(&self, id: &str) -> bool {
        self.task(id).is_some()
    }

    pub fn task_ids(&self) -> BTreeSet<String> {
        self.tasks.iter().map(|task| task.id.clone()).collect()
    }

    /// Task ids in plan order that have no result or a failed one.
    pub fn unresolved_task_ids(&self, results: &TaskResults) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| !results.get(&task.id).is_some_and(|result| result.success))
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses the outermost JSON object embedded in model output.
    pub fn from_model_output(text: &str) -> Result<Self, PlanError> {
        let json = extract_json_object(text).ok_or(PlanError::NoJsonObject)?;
        Self::from_json(json)
    }

    /// Like [`Plan::from_model_output`] but yields an empty plan on any failure.
    pub fn parse_lenient(text: &str) -> Self {
        Self::from_model_output(text).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
}

impl TaskResult {
    pub fn succeeded(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            success: true,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        error: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            success: false,
            output: output.into(),
            error: error.into(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.success { "ok" } else { "failed" }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn dedup_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(dedup_preserving_order(
        raw.unwrap_or_default().into_iter().flatten(),
    ))
}

fn dedup_preserving_order(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}
