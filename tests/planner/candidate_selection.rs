use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::json;

use iris_planner::config::{Config, JudgeRouteConfig};
use iris_planner::core::planner::{PlanExecutionPlanner, PlanJudge, PlanRequest, PlanSource};
use iris_planner::core::providers::{ChatModel, ChatModelFactory};
use iris_planner::runtime::observability::{EventSink, RecordingEventSink};
use iris_planner::runtime::state::{InMemoryRunStateStore, RunStateStore};

use super::harness::ScriptedChatModel;
use super::harness::whitelist;

const UNSAFE_PLAN: &str = r#"{"tasks":[{"id":"a","type":"tool","tool":"shell"}]}"#;
const SMALL_PLAN: &str = r#"{"strategy":"direct","tasks":[{"id":"a","type":"tool","tool":"search"}]}"#;
const LARGE_PLAN: &str = r#"{"strategy":"thorough","tasks":[
  {"id":"a","type":"tool","tool":"search"},
  {"id":"b","type":"tool","tool":"fetch","dependsOn":["a"]},
  {"id":"c","type":"tool","tool":"fetch","dependsOn":["b"]}
]}"#;

fn config(candidates: usize) -> Config {
    let mut config = Config::default();
    config.planning.candidate_plan_count = candidates;
    config
}

struct Harness {
    store: Arc<InMemoryRunStateStore>,
    events: Arc<RecordingEventSink>,
    planner: PlanExecutionPlanner,
}

fn harness(config: &Config, judge: PlanJudge) -> Harness {
    let store = Arc::new(InMemoryRunStateStore::new());
    let events = Arc::new(RecordingEventSink::new());
    let planner = PlanExecutionPlanner::new(
        config,
        judge,
        Arc::clone(&store) as Arc<dyn RunStateStore>,
        Arc::clone(&events) as Arc<dyn EventSink>,
    );
    Harness { store, events, planner }
}

/// Hands every route the same scripted judge.
struct FixedJudgeFactory {
    judge: Arc<ScriptedChatModel>,
    resolved: Mutex<Vec<(String, String)>>,
}

impl ChatModelFactory for FixedJudgeFactory {
    fn resolve(&self, endpoint: &str, model: &str, _temperature: f64) -> Result<Arc<dyn ChatModel>> {
        self.resolved
            .lock()
            .unwrap()
            .push((endpoint.to_string(), model.to_string()));
        Ok(Arc::clone(&self.judge) as Arc<dyn ChatModel>)
    }
}

#[tokio::test]
async fn simplest_valid_candidate_wins_without_a_judge() {
    let config = config(3);
    let h = harness(&config, PlanJudge::disabled());
    let model = ScriptedChatModel::new([UNSAFE_PLAN, SMALL_PLAN, LARGE_PLAN]);
    let tools = whitelist(&["search", "fetch"]);

    let outcome = h
        .planner
        .plan(PlanRequest {
            run_id: "run-1",
            goal: "look it up",
            tool_whitelist: &tools,
            model: model.as_ref(),
        })
        .await
        .unwrap();

    assert!(outcome.valid);
    assert_eq!(outcome.plan.strategy, "direct");
    assert_eq!(outcome.source, PlanSource::Generated);
    assert!(outcome.score < 1.0 && outcome.score > 0.0);
    assert_eq!(outcome.judge_summary["judge_summary"], "judge_disabled_or_unconfigured");

    assert_eq!(h.events.count("PLAN_CANDIDATE_GENERATED"), 3);
    assert_eq!(h.events.count("PLAN_CANDIDATE_JUDGED"), 3);
    let selected = h.events.events_of("PLAN_SELECTED");
    assert_eq!(selected[0].payload["index"], 2);
    assert_eq!(selected[0].payload["reason"], "best_valid_candidate");

    let judged = h.events.events_of("PLAN_CANDIDATE_JUDGED");
    assert_eq!(judged[0].payload["valid"], false);
    assert_eq!(judged[0].payload["validation_reason"], "tool not allowed: shell");
    assert!(judged[0].payload["final_score"].as_f64().unwrap() < -900.0);
}

#[tokio::test]
async fn candidate_count_is_clamped() {
    let h = harness(&config(0), PlanJudge::disabled());
    let model = ScriptedChatModel::new([SMALL_PLAN]);
    let tools = whitelist(&["search"]);

    h.planner
        .plan(PlanRequest {
            run_id: "run-1",
            goal: "look it up",
            tool_whitelist: &tools,
            model: model.as_ref(),
        })
        .await
        .unwrap();

    let started = h.events.events_of("PLAN_STARTED");
    assert_eq!(started[0].payload["candidate_count"], 1);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn invalid_candidates_still_yield_the_best_one() {
    let h = harness(&config(2), PlanJudge::disabled());
    let model = ScriptedChatModel::new([UNSAFE_PLAN, "no json here"]);
    let tools = whitelist(&["search"]);

    let outcome = h
        .planner
        .plan(PlanRequest {
            run_id: "run-1",
            goal: "look it up",
            tool_whitelist: &tools,
            model: model.as_ref(),
        })
        .await
        .unwrap();

    // An empty plan carries no complexity penalty, so it outranks the
    // unsafe one.
    assert!(!outcome.valid);
    assert!(outcome.plan.is_empty());
    assert_eq!(outcome.failure_reason, "plan has no tasks");
    assert!(!h.store.plan_valid("run-1"));

    let selected = h.events.events_of("PLAN_SELECTED");
    assert_eq!(selected[0].payload["index"], 2);
    assert_eq!(selected[0].payload["reason"], "best_invalid_candidate");
    let invalid = h.events.events_of("PLAN_INVALID");
    assert_eq!(invalid[0].payload["reason"], "plan has no tasks");
    assert_eq!(h.events.count("PLAN_CREATED"), 0);
}

#[tokio::test]
async fn failed_generation_yields_no_candidate() {
    let h = harness(&config(2), PlanJudge::disabled());
    let model = ScriptedChatModel::new(Vec::<String>::new());
    let tools = whitelist(&["search"]);

    let outcome = h
        .planner
        .plan(PlanRequest {
            run_id: "run-1",
            goal: "look it up",
            tool_whitelist: &tools,
            model: model.as_ref(),
        })
        .await
        .unwrap();

    assert!(!outcome.valid);
    assert!(outcome.plan.is_empty());
    assert!((outcome.score - -1000.0).abs() < f64::EPSILON);
    assert_eq!(outcome.failure_reason, "no_candidate_generated");
    assert_eq!(outcome.judge_summary, json!({"source": "none"}));
    assert_eq!(h.events.count("PLAN_CANDIDATE_FAILED"), 2);

    let selected = h.events.events_of("PLAN_SELECTED");
    assert_eq!(selected[0].payload["index"], serde_json::Value::Null);
    assert_eq!(selected[0].payload["reason"], "no_candidate_generated");
}

#[tokio::test]
async fn semantic_judge_breaks_structural_ties() {
    let mut config = config(2);
    config.judge.enabled = true;
    config.judge.routes = vec![JudgeRouteConfig {
        endpoint: "local".into(),
        models: vec!["judge-small".into()],
    }];
    let judge_model = ScriptedChatModel::new([
        r#"{"coverage_score":0,"feasibility_score":0.5,"redundancy_penalty":0,"summary":"misses the goal"}"#,
        r#"{"coverage_score":1,"feasibility_score":1,"redundancy_penalty":0,"summary":"covers it"}"#,
    ]);
    let factory = Arc::new(FixedJudgeFactory {
        judge: judge_model.clone(),
        resolved: Mutex::new(Vec::new()),
    });
    let judge = PlanJudge::new(&config.judge, Some(Arc::clone(&factory) as Arc<dyn ChatModelFactory>));
    let h = harness(&config, judge);

    let model = ScriptedChatModel::new([
        r#"{"strategy":"first","tasks":[{"id":"a","type":"tool","tool":"search"}]}"#,
        r#"{"strategy":"second","tasks":[{"id":"a","type":"tool","tool":"search"}]}"#,
    ]);
    let tools = whitelist(&["search"]);

    let outcome = h
        .planner
        .plan(PlanRequest {
            run_id: "run-1",
            goal: "look it up",
            tool_whitelist: &tools,
            model: model.as_ref(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.plan.strategy, "second");
    assert_eq!(outcome.judge_summary["judge_summary"], "covers it");
    assert_eq!(outcome.judge_summary["judge_endpoint"], "local");
    assert_eq!(outcome.judge_summary["judge_model"], "judge-small");
    assert_eq!(judge_model.calls(), 2);
    assert_eq!(factory.resolved.lock().unwrap().len(), 2);

    let judged = h.events.events_of("PLAN_CANDIDATE_JUDGED");
    assert!((judged[1].payload["llm_judge_score"].as_f64().unwrap() - 1.0).abs() < 1e-9);
}
