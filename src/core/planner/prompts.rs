//! Message builders for every model call the planner makes.

use super::types::{Plan, TaskResults, ToolWhitelist};
use super::validator::PlanLimits;
use crate::core::providers::ChatMessage;
use serde_json::Value;

const PLAN_SCHEMA: &str = concat!(
    "{\n",
    "  \"strategy\": \"<one line>\",\n",
    "  \"finalHint\": \"<how to compose the final answer>\",\n",
    "  \"tasks\": [\n",
    "    {\"id\": \"t1\", \"type\": \"tool\", \"tool\": \"<name>\", \"args\": {}, \"dependsOn\": []},\n",
    "    {\"id\": \"t2\", \"type\": \"sub_agent\", \"goal\": \"<sub goal>\", \"maxSteps\": 3, \"dependsOn\": [\"t1\"]}\n",
    "  ]\n",
    "}",
);

fn sorted_tools(whitelist: &ToolWhitelist) -> String {
    whitelist.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn results_json(results: &TaskResults) -> String {
    serde_json::to_string(results).unwrap_or_else(|_| "{}".to_string())
}

pub fn candidate_messages(
    goal: &str,
    whitelist: &ToolWhitelist,
    limits: &PlanLimits,
    index: usize,
    total: usize,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are the planner of a tool-using AI agent. Break the goal into a DAG of tasks.\n\
         Task types: \"tool\" calls exactly one tool; \"sub_agent\" delegates a sub goal.\n\
         Allowed tools: {tools}\n\
         At most {max_tasks} tasks; sub_agent maxSteps at most {max_steps}.\n\
         Independent tasks must not depend on each other so they can run in parallel.\n\
         A tool arg may reference a dependency output as ${{taskId.output}} or ${{taskId.output.field}}.\n\
         Output JSON only, in this shape:\n{PLAN_SCHEMA}",
        tools = sorted_tools(whitelist),
        max_tasks = limits.max_tasks,
        max_steps = limits.sub_agent_max_steps,
    );
    let user = format!(
        "Goal: {goal}\nCandidate {index} of {total}. Propose a plan that differs from the other candidates where it helps.",
        index = index + 1,
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn judge_system_prompt() -> &'static str {
    concat!(
        "You are a strict plan judge for a tool-using AI agent. ",
        "Score how well the plan achieves the goal. ",
        "Output JSON only: {\"coverage_score\": 0..1, \"feasibility_score\": 0..1, ",
        "\"redundancy_penalty\": 0..1, \"summary\": \"<one sentence>\"}. ",
        "Do not output markdown.",
    )
}

pub fn judge_user_prompt(goal: &str, plan: &Plan) -> String {
    serde_json::json!({ "goal": goal, "plan": plan }).to_string()
}

pub fn patch_messages(
    goal: &str,
    plan: &Plan,
    unresolved: &[String],
    blocked: &[String],
    results: &TaskResults,
    whitelist: &ToolWhitelist,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are a patch planner for a running DAG plan. Patch only the unresolved downstream \
         region; completed tasks stay untouched and the plan must stay dependency-safe.\n\
         Allowed tools: {tools}\n\
         Reference dependency outputs only as ${{task_id.output}} or ${{task_id.output.path.to.field}}; \
         never emit {{{{...}}}} or task.output style placeholders.\n\
         Output JSON only, no markdown:\n\
         {{\"reason\": \"<why>\", \"replace_task_ids\": [\"<unresolved ids to drop>\"], \
         \"tasks\": [<new tasks, same shape as plan tasks>]}}",
        tools = sorted_tools(whitelist),
    );
    let user = format!(
        "Goal: {goal}\nCurrent plan: {plan}\nUnresolved task ids: {unresolved}\n\
         Blocked task ids: {blocked}\nTask results: {results}",
        plan = plan.to_json(),
        unresolved = Value::from(unresolved.to_vec()),
        blocked = Value::from(blocked.to_vec()),
        results = results_json(results),
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn final_answer_messages(goal: &str, final_hint: &str, results: &TaskResults) -> Vec<ChatMessage> {
    let mut system =
        String::from("Compose the final answer for the user from the task results. Be concise and factual.");
    if !final_hint.trim().is_empty() {
        system.push_str("\nHint: ");
        system.push_str(final_hint.trim());
    }
    let user = format!("Goal: {goal}\nTask results: {}", results_json(results));
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn sub_agent_plan_messages(
    goal: &str,
    context: &str,
    whitelist: &ToolWhitelist,
    max_steps: u32,
    retry_hint: &str,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are a sub-task agent. First output a linear step plan as JSON with at most {max_steps} steps.\n\
         Use only these tool names: {tools}.\n\
         Never use sub_agent, workflow, tool or agent as a step tool name.\n\
         Output format:\n\
         {{\"steps\":[{{\"tool\":\"name\",\"args\":{{}},\"note\":\"why\"}}],\"expected\":\"...\"}}",
        tools = sorted_tools(whitelist),
    );
    let mut user = format!("Goal: {goal}\nContext: {context}");
    if !retry_hint.is_empty() {
        user.push('\n');
        user.push_str(retry_hint);
    }
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn sub_agent_summary_messages(goal: &str, steps_json: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Summarize the tool results below into a short conclusion the main flow can merge.",
        ),
        ChatMessage::user(format!("Goal: {goal}\nResults: {steps_json}")),
    ]
}
