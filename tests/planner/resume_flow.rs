use std::sync::Arc;

use serde_json::json;

use iris_planner::core::planner::{ExecutionStatus, FailureReason, PlanSource, TaskResult};
use iris_planner::runtime::state::{ReplanState, RunControl, RunStateStore};

use super::harness::{
    CountdownGate, Fixture, RecordingToolRouter, ScriptedChatModel, single_candidate_config,
    whitelist,
};

const FAN_IN_PLAN: &str = r#"{"tasks":[
  {"id":"A","type":"tool","tool":"search"},
  {"id":"B","type":"tool","tool":"fetch"},
  {"id":"C","type":"tool","tool":"merge","dependsOn":["A","B"],"args":{"left":"${A.output}"}}
]}"#;

fn tools() -> Arc<RecordingToolRouter> {
    RecordingToolRouter::new()
        .reply("search", "fresh hits")
        .reply("fetch", "page")
        .reply("merge", "merged")
}

#[tokio::test]
async fn stored_results_are_not_executed_again() {
    let fixture = Fixture::new(single_candidate_config(), tools());
    fixture
        .store
        .save_task_result("run-1", &TaskResult::succeeded("A", "tool", "cached hits"))
        .await
        .unwrap();
    let model = ScriptedChatModel::new([FAN_IN_PLAN, "done"]);

    let (_, executed) = fixture
        .run("run-1", "gather", &whitelist(&["search", "fetch", "merge"]), model)
        .await;

    assert_eq!(executed.status, ExecutionStatus::Succeeded);
    assert!(fixture.tools.calls_to("search").is_empty());
    assert_eq!(fixture.tools.calls_to("merge")[0]["left"], "cached hits");
    assert_eq!(executed.task_results["A"].output, "cached hits");

    let first_wave = &fixture.events.events_of("PARALLEL_WAVE_STARTED")[0];
    assert_eq!(first_wave.payload["task_ids"], json!(["B"]));
}

#[tokio::test]
async fn paused_run_resumes_with_the_stored_plan() {
    let control = Arc::new(RunControl::new());
    control.register("run-1", None);
    control.pause("run-1").unwrap();
    let fixture = Fixture::new(single_candidate_config(), tools()).with_gate(control.clone());
    let tools = whitelist(&["search", "fetch", "merge"]);

    let (_, paused) = fixture
        .run("run-1", "gather", &tools, ScriptedChatModel::new([FAN_IN_PLAN]))
        .await;

    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(paused.failure_reason, None);
    assert!(fixture.tools.calls().is_empty());
    assert_eq!(paused.unresolved_task_ids, vec!["A", "B", "C"]);
    let completed = fixture.events.events_of("EXECUTION_COMPLETED");
    assert_eq!(completed[0].payload["status"], "paused");

    control.resume("run-1").unwrap();
    let resumed = fixture.restarted();
    let model = ScriptedChatModel::new(["done"]);
    let (planned, executed) = resumed.run("run-1", "gather", &tools, model.clone()).await;

    assert_eq!(planned.source, PlanSource::Stored);
    assert_eq!(planned.judge_summary, json!({"source": "stored_plan"}));
    assert_eq!(resumed.events.count("PLAN_REUSED"), 1);
    assert_eq!(executed.status, ExecutionStatus::Succeeded);
    assert_eq!(model.calls(), 1);
    assert_eq!(fixture.tools.calls().len(), 3);
}

#[tokio::test]
async fn canceled_run_stops_before_the_first_wave() {
    let control = Arc::new(RunControl::new());
    control.register("run-1", None);
    control.cancel("run-1").unwrap();
    let fixture = Fixture::new(single_candidate_config(), tools()).with_gate(control);

    let (_, executed) = fixture
        .run(
            "run-1",
            "gather",
            &whitelist(&["search", "fetch", "merge"]),
            ScriptedChatModel::new([FAN_IN_PLAN]),
        )
        .await;

    assert_eq!(executed.status, ExecutionStatus::Paused);
    assert_eq!(fixture.events.count("PARALLEL_WAVE_STARTED"), 0);
}

#[tokio::test]
async fn operator_override_is_used_once() {
    let fixture = Fixture::new(single_candidate_config(), tools());
    fixture.store.store_plan_override(
        "run-1",
        r#"{"strategy":"operator","tasks":[{"id":"only","type":"tool","tool":"fetch"}]}"#,
    );
    let model = ScriptedChatModel::new(["fetched"]);

    let (planned, executed) = fixture
        .run("run-1", "gather", &whitelist(&["fetch"]), model.clone())
        .await;

    assert_eq!(planned.source, PlanSource::Override);
    assert!(planned.valid);
    assert!(planned.score.abs() < f64::EPSILON);
    assert_eq!(planned.judge_summary, json!({"source": "plan_override"}));
    assert_eq!(planned.plan.strategy, "operator");
    assert!(!fixture.store.is_plan_override("run-1").await.unwrap());
    assert_eq!(fixture.events.count("PLAN_OVERRIDE_USED"), 1);
    assert_eq!(fixture.events.count("PLAN_CANDIDATE_GENERATED"), 0);

    assert_eq!(executed.status, ExecutionStatus::Succeeded);
    assert_eq!(executed.final_answer, "fetched");
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn malformed_stored_plan_is_reported_invalid() {
    let fixture = Fixture::new(single_candidate_config(), tools());
    fixture
        .store
        .record_plan("run-1", "{\"tasks\": [oops", true)
        .await
        .unwrap();

    let planned = fixture
        .planner()
        .plan(iris_planner::core::planner::PlanRequest {
            run_id: "run-1",
            goal: "gather",
            tool_whitelist: &whitelist(&["fetch"]),
            model: ScriptedChatModel::new(Vec::<String>::new()).as_ref(),
        })
        .await
        .unwrap();

    assert_eq!(planned.source, PlanSource::Stored);
    assert!(!planned.valid);
    assert_eq!(planned.failure_reason, "plan has no tasks");
    assert_eq!(planned.plan_json, "{\"tasks\": [oops");
    assert_eq!(
        fixture.store.load_plan("run-1").await.unwrap().as_deref(),
        Some("{\"tasks\": [oops")
    );
    assert!(!fixture.store.plan_valid("run-1"));
    let reused = fixture.events.events_of("PLAN_REUSED");
    assert_eq!(reused[0].payload["valid"], false);
}

#[tokio::test]
async fn malformed_override_is_kept_as_written() {
    let fixture = Fixture::new(single_candidate_config(), tools());
    fixture.store.store_plan_override("run-1", "not a plan");

    let planned = fixture
        .planner()
        .plan(iris_planner::core::planner::PlanRequest {
            run_id: "run-1",
            goal: "gather",
            tool_whitelist: &whitelist(&["fetch"]),
            model: ScriptedChatModel::new(Vec::<String>::new()).as_ref(),
        })
        .await
        .unwrap();

    assert_eq!(planned.source, PlanSource::Override);
    assert!(!planned.valid);
    assert_eq!(
        fixture.store.load_plan("run-1").await.unwrap().as_deref(),
        Some("not a plan")
    );
}

#[tokio::test]
async fn pause_between_waves_resumes_to_the_uninterrupted_result() {
    let tools_allowed = whitelist(&["search", "fetch", "merge"]);

    let baseline = Fixture::new(single_candidate_config(), tools());
    let (_, uninterrupted) = baseline
        .run("run-1", "gather", &tools_allowed, ScriptedChatModel::new([FAN_IN_PLAN, "done"]))
        .await;
    assert_eq!(uninterrupted.status, ExecutionStatus::Succeeded);

    // Open for exactly one wave.
    let gate = CountdownGate::new(1);
    let fixture = Fixture::new(single_candidate_config(), tools()).with_gate(gate.clone());
    let (_, paused) = fixture
        .run("run-1", "gather", &tools_allowed, ScriptedChatModel::new([FAN_IN_PLAN]))
        .await;

    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(paused.unresolved_task_ids, vec!["C"]);
    assert!(paused.task_results["A"].success);
    assert!(paused.task_results["B"].success);
    assert!(!paused.task_results.contains_key("C"));
    let completed = fixture.events.events_of("PARALLEL_WAVE_COMPLETED");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].payload["succeeded"], 2);
    assert!(fixture.tools.calls_to("merge").is_empty());

    gate.reopen();
    let resumed = fixture.restarted();
    let model = ScriptedChatModel::new(["done"]);
    let (planned, executed) = resumed.run("run-1", "gather", &tools_allowed, model.clone()).await;

    assert_eq!(planned.source, PlanSource::Stored);
    assert_eq!(executed.status, ExecutionStatus::Succeeded);
    assert_eq!(executed.task_results, uninterrupted.task_results);
    assert_eq!(model.calls(), 1);
    for tool in ["search", "fetch", "merge"] {
        assert_eq!(fixture.tools.calls_to(tool).len(), 1, "{tool} ran more than once");
    }
    let waves = resumed.events.events_of("PARALLEL_WAVE_STARTED");
    assert_eq!(waves.len(), 1);
    assert_eq!(waves[0].payload["task_ids"], json!(["C"]));
}

#[tokio::test]
async fn replan_budget_carries_across_a_pause() {
    let mut config = single_candidate_config();
    config.planning.max_local_replans = 1;
    let flaky = RecordingToolRouter::new().fail("flaky", "connection reset");
    // First pass and the post-pass check, then closed before the patched pass.
    let gate = CountdownGate::new(2);
    let fixture = Fixture::new(config, flaky).with_gate(gate.clone());
    let allowed = whitelist(&["flaky"]);
    let model = ScriptedChatModel::new([
        r#"{"tasks":[{"id":"x","type":"tool","tool":"flaky"}]}"#,
        r#"{"reason":"retry","replace_task_ids":["x"],"tasks":[{"id":"x","type":"tool","tool":"flaky"}]}"#,
    ]);

    let (_, paused) = fixture.run("run-1", "fetch", &allowed, model).await;

    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(paused.replan_count, 1);
    assert_eq!(
        fixture.store.load_replan_state("run-1").await.unwrap(),
        ReplanState {
            replan_count: 1,
            unresolved_task_ids: vec!["x".into()],
        }
    );

    gate.reopen();
    let resumed = fixture.restarted();
    let model = ScriptedChatModel::new(Vec::<String>::new());
    let (_, executed) = resumed.run("run-1", "fetch", &allowed, model.clone()).await;

    assert_eq!(executed.status, ExecutionStatus::Failed);
    assert_eq!(executed.failure_reason, Some(FailureReason::LocalReplanExhausted));
    assert_eq!(executed.replan_count, 1);
    assert_eq!(model.calls(), 0);
    assert_eq!(resumed.events.count("PLAN_PATCH_REQUESTED"), 0);
    // Once before the patch, once after the resume; the patched pass never started.
    assert_eq!(fixture.tools.calls_to("flaky").len(), 2);

    let exhausted = resumed.events.events_of("PLAN_PATCH_EXHAUSTED");
    assert_eq!(exhausted[0].payload["replan_count"], 1);
    assert_eq!(exhausted[0].payload["max_local_replans"], 1);
}
