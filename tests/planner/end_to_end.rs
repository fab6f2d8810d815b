use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Barrier;

use iris_planner::core::planner::{ExecutionStatus, FailureReason, PlanSource, QualityReport};
use iris_planner::runtime::state::RunStateStore;

use super::harness::{Fixture, RecordingToolRouter, ScriptedChatModel, single_candidate_config, whitelist};

const FAN_IN_PLAN: &str = r#"Here is the plan:
{"strategy":"fan-in","finalHint":"cite both sources","tasks":[
  {"id":"A","type":"tool","tool":"search","args":{"q":"rust"}},
  {"id":"B","type":"tool","tool":"fetch","args":{"url":"https://example.com"}},
  {"id":"C","type":"tool","tool":"merge","dependsOn":["A","B"],
   "args":{"left":"${A.output}","right":"${B.output.title}","note":"about ${B.output.title}"}}
]}"#;

fn fan_in_tools() -> Arc<RecordingToolRouter> {
    RecordingToolRouter::new()
        .reply("search", "hits")
        .reply("fetch", r#"{"title":"Rust","year":2015}"#)
        .reply("merge", "merged")
}

#[tokio::test]
async fn fan_in_plan_runs_in_two_waves_and_answers() {
    let fixture = Fixture::new(single_candidate_config(), fan_in_tools());
    let model = ScriptedChatModel::new([FAN_IN_PLAN, "Rust turned up in both sources."]);
    let tools = whitelist(&["search", "fetch", "merge"]);

    let (planned, executed) = fixture.run("run-1", "compare sources", &tools, model.clone()).await;

    assert!(planned.valid);
    assert_eq!(planned.source, PlanSource::Generated);
    assert_eq!(executed.status, ExecutionStatus::Succeeded);
    assert_eq!(executed.failure_reason, None);
    assert_eq!(executed.final_answer, "Rust turned up in both sources.");
    assert_eq!(executed.replan_count, 0);
    assert!(executed.unresolved_task_ids.is_empty());
    assert_eq!(executed.task_results.len(), 3);
    assert!(executed.task_results.values().all(|result| result.success));

    let waves = fixture.events.events_of("PARALLEL_WAVE_STARTED");
    assert_eq!(waves.len(), 2);
    assert_eq!(waves[0].payload["task_ids"], json!(["A", "B"]));
    assert_eq!(waves[1].payload["task_ids"], json!(["C"]));

    let merge_args = fixture.tools.calls_to("merge");
    assert_eq!(merge_args.len(), 1);
    assert_eq!(merge_args[0]["left"], "hits");
    assert_eq!(merge_args[0]["right"], "Rust");
    assert_eq!(merge_args[0]["note"], "about Rust");

    let final_prompt = &model.prompts()[1];
    assert!(final_prompt[0].content.ends_with("Hint: cite both sources"));
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn first_wave_tasks_run_concurrently() {
    // Neither tool returns until both have been entered.
    let barrier = Arc::new(Barrier::new(2));
    let tools = RecordingToolRouter::new()
        .rendezvous("search", "hits", &barrier)
        .rendezvous("fetch", r#"{"title":"Rust","year":2015}"#, &barrier)
        .reply("merge", "merged");
    let fixture = Fixture::new(single_candidate_config(), tools);
    let model = ScriptedChatModel::new([FAN_IN_PLAN, "done"]);
    let allowed = whitelist(&["search", "fetch", "merge"]);

    let (_, executed) = tokio::time::timeout(
        Duration::from_secs(5),
        fixture.run("run-1", "compare sources", &allowed, model),
    )
    .await
    .expect("search and fetch never overlapped");

    assert_eq!(executed.status, ExecutionStatus::Succeeded);
    assert_eq!(fixture.tools.calls_to("merge")[0]["right"], "Rust");
}

#[tokio::test]
async fn event_trail_brackets_planning_and_execution() {
    let fixture = Fixture::new(single_candidate_config(), fan_in_tools());
    let model = ScriptedChatModel::new([FAN_IN_PLAN, "done"]);
    let tools = whitelist(&["search", "fetch", "merge"]);

    fixture.run("run-1", "compare sources", &tools, model).await;

    let types = fixture.events.event_types();
    assert_eq!(
        &types[..6],
        &[
            "PLAN_STARTED",
            "PLAN_CANDIDATE_GENERATED",
            "PLAN_CANDIDATE_JUDGED",
            "PLAN_SELECTED",
            "PLAN_CREATED",
            "PLAN_ANALYZED",
        ]
    );
    assert_eq!(types.last(), Some(&"EXECUTION_COMPLETED"));
    assert_eq!(fixture.events.count("PARALLEL_TASK_FINISHED"), 3);

    let completed = fixture.events.events_of("EXECUTION_COMPLETED");
    assert_eq!(completed[0].payload["status"], "succeeded");
    assert_eq!(completed[0].payload["replan_count"], 0);

    let analyzed = fixture.events.events_of("PLAN_ANALYZED");
    assert_eq!(analyzed[0].payload["source"], "generated");
    assert_eq!(analyzed[0].payload["metrics"]["task_count"], 3);
}

#[tokio::test]
async fn plan_and_results_are_persisted() {
    let fixture = Fixture::new(single_candidate_config(), fan_in_tools());
    let model = ScriptedChatModel::new([FAN_IN_PLAN, "done"]);
    let tools = whitelist(&["search", "fetch", "merge"]);

    let (planned, _) = fixture.run("run-1", "compare sources", &tools, model).await;

    let stored = fixture.store.load_plan("run-1").await.unwrap().unwrap();
    assert_eq!(stored, planned.plan_json);
    assert!(fixture.store.plan_valid("run-1"));
    let results = fixture.store.load_task_results("run-1").await.unwrap();
    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    assert_eq!(fixture.store.started_tasks("run-1").len(), 3);
}

#[tokio::test]
async fn quality_report_reflects_full_coverage() {
    let fixture = Fixture::new(single_candidate_config(), fan_in_tools());
    let model = ScriptedChatModel::new([FAN_IN_PLAN, "done"]);
    let tools = whitelist(&["search", "fetch", "merge"]);

    let (planned, executed) = fixture.run("run-1", "compare sources", &tools, model).await;
    let report = QualityReport::for_run(&planned, &executed);

    assert!((report.goal_coverage - 1.0).abs() < f64::EPSILON);
    assert_eq!(report.task_total, 3);
    assert_eq!(report.task_success, 3);
    assert_eq!(report.task_results_summary.failed, 0);
    assert_eq!(report.judge_summary["judge_summary"], "judge_disabled_or_unconfigured");
    assert!((report.plan_score - planned.score).abs() < f64::EPSILON);
}

#[tokio::test]
async fn blank_final_answer_fails_the_run() {
    let fixture = Fixture::new(single_candidate_config(), fan_in_tools());
    let model = ScriptedChatModel::new([FAN_IN_PLAN, "   "]);
    let tools = whitelist(&["search", "fetch", "merge"]);

    let (_, executed) = fixture.run("run-1", "compare sources", &tools, model).await;

    assert_eq!(executed.status, ExecutionStatus::Failed);
    assert_eq!(executed.failure_reason, Some(FailureReason::FinalAnswerBlank));
    assert!(executed.unresolved_task_ids.is_empty());
    assert!(executed.final_answer.is_empty());
    let completed = fixture.events.events_of("EXECUTION_COMPLETED");
    assert_eq!(completed[0].payload["failure_reason"], "final_answer_blank");
}

#[tokio::test]
async fn sub_agent_task_feeds_its_answer_downstream() {
    let plan = r#"{"tasks":[
      {"id":"research","type":"sub_agent","goal":"find the release year","maxSteps":2},
      {"id":"report","type":"tool","tool":"merge","dependsOn":["research"],
       "args":{"body":"${research.output}"}}
    ]}"#;
    let tools = RecordingToolRouter::new()
        .reply("search", r#"{"year":2015}"#)
        .reply("merge", "ok");
    let fixture = Fixture::new(single_candidate_config(), tools);
    let model = ScriptedChatModel::new([
        plan,
        r#"{"steps":[{"tool":"search","args":{"q":"rust 1.0"}}],"expected":"a year"}"#,
        "Released in 2015.",
        "Rust 1.0 shipped in 2015.",
    ]);

    let (_, executed) = fixture
        .run("run-1", "when was rust released", &whitelist(&["search", "merge"]), model)
        .await;

    assert_eq!(executed.status, ExecutionStatus::Succeeded);
    assert_eq!(executed.task_results["research"].output, "Released in 2015.");
    assert_eq!(executed.task_results["research"].task_type, "sub_agent");
    assert_eq!(fixture.tools.calls_to("merge")[0]["body"], "Released in 2015.");
    assert_eq!(fixture.events.count("SUB_AGENT_COMPLETED"), 1);
}
