mod common;

use async_trait::async_trait;
use common::*;
use portcore::{
    ActivityContext, ActivityId, ActivitySpec, ApprovalSpec, ApprovalStatus, ExecutedPort,
    ExecutionMode, ExecutionState, ExecutionStatus, FlowDefinition, FlowError, JoinMode, LogLevel,
    PortDescriptor, StepStatus, Value, ValueKind,
};
use portruntime::{
    ApprovalResolver, Engine, ExecutionCoordinator, GatePipeline, RunOutcome, RuntimeConfig,
    StepOutcome, APPROVALS, COMPOSITE_TYPE, EXECUTE_STEP, READINESS_CHECK, SCRIPT_TYPE,
    WAIT_FOR_CONNECTIONS,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn loop_flow(times: i64) -> FlowDefinition {
    let mut definition = FlowDefinition::new("loop");
    definition.add_activity(pass("start"));
    definition.add_activity(
        ActivitySpec::new("loop", "test.repeat").with_parameter("times", times.to_string()),
    );
    definition.add_activity(ActivitySpec::new("body", "test.count"));
    definition.add_activity(pass("end"));
    definition.connect("start", "Out", "loop", "In");
    definition.connect("loop", "Body", "body", "In");
    definition.connect("body", "Out", "loop", "BodyComplete");
    definition.connect("loop", "Done", "end", "In");
    definition
}

fn diamond() -> FlowDefinition {
    let mut definition = FlowDefinition::new("diamond");
    for id in ["start", "left", "right", "join"] {
        definition.add_activity(pass(id));
    }
    definition.connect("start", "Out", "left", "In");
    definition.connect("start", "Out", "right", "In");
    definition.connect("left", "Out", "join", "In");
    definition.connect("right", "Out", "join", "In");
    definition
}

#[tokio::test]
async fn test_linear_flow_completes() {
    init_tracing();
    let engine = engine();

    let (outcome, state) = run(&engine, &chain("linear", &["a", "b", "c"]), None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    for id in ["a", "b", "c"] {
        assert_eq!(status(&state, id), Some(ExecutionStatus::Completed));
        assert_eq!(
            state.step_status(&ActivityId::from(id), EXECUTE_STEP),
            Some(StepStatus::Completed)
        );
    }

    let history = state.executed_connections();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].connection.source.as_str(), "a");
    assert_eq!(history[1].connection.source.as_str(), "b");
    assert_eq!(history[1].data.value("data"), Some(Value::from("b")));
}

#[tokio::test]
async fn test_loop_rearms_once_per_body_completion() {
    init_tracing();
    let engine = engine();

    let (outcome, state) = run(&engine, &loop_flow(3), None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state.variable("count"), Some(Value::Number(3.0)));
    assert_eq!(status(&state, "end"), Some(ExecutionStatus::Completed));

    let rearms = state
        .executed_connections()
        .iter()
        .filter(|c| c.connection.is_loop_back())
        .count();
    assert_eq!(rearms, 3);
    assert_eq!(transitions_to(&state, "body", ExecutionStatus::Completed), 3);

    // The loop item is created once and only ever re-armed afterwards.
    assert_eq!(transitions_to(&state, "loop", ExecutionStatus::Pending), 1);
    assert_eq!(transitions_to(&state, "loop", ExecutionStatus::Ready), 4);
    assert_eq!(state.queue_item(&ActivityId::from("loop")).unwrap().activation, 0);
    assert_eq!(state.queue_item(&ActivityId::from("body")).unwrap().activation, 2);

    // start->loop, 3x loop->body, 3x body->loop, loop->end
    assert_eq!(state.executed_connections().len(), 8);
}

#[tokio::test]
async fn test_loop_with_zero_iterations_skips_body() {
    let engine = engine();

    let (outcome, state) = run(&engine, &loop_flow(0), None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "body"), None);
    assert_eq!(status(&state, "end"), Some(ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_convergent_branches_ready_once() {
    init_tracing();
    let engine = engine();

    let (outcome, state) = run(&engine, &diamond(), None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(transitions_to(&state, "join", ExecutionStatus::Ready), 1);
    assert_eq!(transitions_to(&state, "join", ExecutionStatus::Executing), 1);
    assert_eq!(transitions_to(&state, "join", ExecutionStatus::Completed), 1);
    assert_eq!(state.inbound_fired(&ActivityId::from("join")).len(), 2);
}

#[tokio::test]
async fn test_any_join_runs_per_arrival() {
    let engine = engine();
    let mut definition = FlowDefinition::new("any");
    definition.add_activity(pass("start"));
    definition.add_activity(pass("left"));
    definition.add_activity(pass("right"));
    definition.add_activity(
        ActivitySpec::new("join", "test.count").with_join(JoinMode::Any),
    );
    definition.connect("start", "Out", "left", "In");
    definition.connect("start", "Out", "right", "In");
    definition.connect("left", "Out", "join", "In");
    definition.connect("right", "Out", "join", "In");

    let (outcome, state) = run(&engine, &definition, None).await;

    // Both branches arrive in the same batch; the second finds the item live.
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(transitions_to(&state, "join", ExecutionStatus::Ready), 1);
    assert_eq!(transitions_to(&state, "join", ExecutionStatus::Completed), 1);
    assert_eq!(state.variable("count"), Some(Value::Number(1.0)));
}

fn fan_in(branches: usize, join: JoinMode) -> FlowDefinition {
    let mut definition = FlowDefinition::new("fan-in");
    definition.add_activity(pass("start"));
    definition.add_activity(ActivitySpec::new("join", "test.count").with_join(join));
    for i in 0..branches {
        let id = format!("branch{}", i);
        definition.add_activity(pass(&id));
        definition.connect("start", "Out", id.as_str(), "In");
        definition.connect(id.as_str(), "Out", "join", "In");
    }
    definition
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_branches_make_join_ready_once() {
    let engine = engine();

    for _ in 0..20 {
        let (outcome, state) = run(&engine, &fan_in(8, JoinMode::All), None).await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(transitions_to(&state, "join", ExecutionStatus::Ready), 1);
        assert_eq!(transitions_to(&state, "join", ExecutionStatus::Executing), 1);
        assert_eq!(state.variable("count"), Some(Value::Number(1.0)));
        assert_eq!(state.inbound_fired(&ActivityId::from("join")).len(), 8);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_any_join_ready_once() {
    let engine = engine();
    let definition = fan_in(8, JoinMode::Any);

    for _ in 0..20 {
        let (outcome, state) = run(&engine, &definition, None).await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(transitions_to(&state, "join", ExecutionStatus::Ready), 1);
        assert_eq!(state.variable("count"), Some(Value::Number(1.0)));
    }
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let engine = engine();

    let mut previous: Option<(Vec<String>, BTreeMap<String, ExecutionStatus>)> = None;
    for _ in 0..5 {
        let (outcome, state) = run(&engine, &loop_flow(2), None).await;
        assert_eq!(outcome, RunOutcome::Completed);

        let mut history: Vec<String> = state
            .executed_connections()
            .iter()
            .map(|c| c.connection.to_string())
            .collect();
        history.sort();
        let statuses: BTreeMap<String, ExecutionStatus> = state
            .queue_items()
            .into_iter()
            .map(|item| (item.activity_id.to_string(), item.status))
            .collect();

        if let Some(previous) = &previous {
            assert_eq!(previous, &(history.clone(), statuses.clone()));
        }
        previous = Some((history, statuses));
    }
}

#[tokio::test]
async fn test_readiness_holds_until_variable_set() {
    init_tracing();
    let engine = engine();
    let mut definition = chain("gated", &["start"]);
    definition.add_activity(ActivitySpec::new("gate", "test.gate"));
    definition.add_activity(pass("end"));
    definition.connect("start", "Out", "gate", "In");
    definition.connect("gate", "Out", "end", "In");
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));

    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Waiting {
            activities: vec![ActivityId::from("gate")]
        }
    );
    let item = state.queue_item(&ActivityId::from("gate")).unwrap();
    assert_eq!(item.status, ExecutionStatus::Waiting);
    assert_eq!(item.reason.as_deref(), Some("go is not set"));
    assert_eq!(
        state.step_status(&ActivityId::from("gate"), WAIT_FOR_CONNECTIONS),
        Some(StepStatus::Completed)
    );
    assert_eq!(
        state.step_status(&ActivityId::from("gate"), READINESS_CHECK),
        Some(StepStatus::Waiting)
    );

    state.set_variable("go", Value::Bool(true));
    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "end"), Some(ExecutionStatus::Completed));
}

fn review_flow() -> FlowDefinition {
    let mut definition = chain("review", &["start"]);
    definition.add_activity(
        pass("review")
            .with_approval(ApprovalSpec::new("lead", "manual"))
            .with_approval(ApprovalSpec::new("qa", "manual")),
    );
    definition.add_activity(pass("publish"));
    definition.connect("start", "Out", "review", "In");
    definition.connect("review", "Out", "publish", "In");
    definition
}

#[tokio::test]
async fn test_all_approvals_required() {
    init_tracing();
    let engine = engine();
    let flow = parse(&engine, &review_flow());
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let review = ActivityId::from("review");

    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Waiting { .. }));
    assert_eq!(state.approval(&review, "lead"), Some(ApprovalStatus::Pending));

    state.set_approval(&review, "lead", ApprovalStatus::Approved);
    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Waiting { .. }));
    assert_eq!(status(&state, "publish"), None);

    state.set_approval(&review, "qa", ApprovalStatus::Approved);
    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "publish"), Some(ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_rejection_fails_activity() {
    let engine = engine();
    let flow = parse(&engine, &review_flow());
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let review = ActivityId::from("review");

    run_state(&engine, &flow, &state, None).await.unwrap();
    state.set_approval(&review, "lead", ApprovalStatus::Approved);
    state.set_approval(&review, "qa", ApprovalStatus::Rejected);
    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "review"), Some(ExecutionStatus::Failed));
    assert_eq!(status(&state, "publish"), None);
    assert!(state
        .logs_for(&review)
        .iter()
        .any(|entry| entry.level == LogLevel::Error));
}

#[tokio::test]
async fn test_condition_approval_reads_variables() {
    let engine = engine();
    let mut definition = chain("condition", &["start"]);
    definition.add_activity(
        pass("check").with_approval(
            ApprovalSpec::new("limit", "condition")
                .with_option("left", "$var(amount)")
                .with_option("op", "<=")
                .with_option("right", "100"),
        ),
    );
    definition.connect("start", "Out", "check", "In");
    definition
        .variables
        .insert("amount".to_string(), serde_json::json!(250));
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));

    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Waiting { .. }));

    state.set_variable("amount", Value::Number(80.0));
    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "check"), Some(ExecutionStatus::Completed));
}

struct UnreachableApproval;

#[async_trait]
impl ApprovalResolver for UnreachableApproval {
    async fn resolve(
        &self,
        _ctx: &ActivityContext,
        _options: &HashMap<String, String>,
    ) -> Result<ApprovalStatus, FlowError> {
        Err(FlowError::Execution("ledger unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_resolver_error_fails_activity() {
    init_tracing();
    let engine = Arc::new(
        Engine::new(Arc::new(registry()), RuntimeConfig::default())
            .with_approval_resolver("unreachable", Arc::new(UnreachableApproval)),
    );
    let mut definition = chain("audit", &["start"]);
    definition.add_activity(pass("check").with_approval(ApprovalSpec::new("audit", "unreachable")));
    definition.add_activity(pass("after"));
    definition.connect("start", "Out", "check", "In");
    definition.connect("check", "Out", "after", "In");
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let check = ActivityId::from("check");

    let outcome = run_state(&engine, &flow, &state, None).await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "check"), Some(ExecutionStatus::Failed));
    assert_eq!(status(&state, "after"), None);
    assert_eq!(state.approval(&check, "audit"), Some(ApprovalStatus::Rejected));
    assert!(state
        .logs_for(&check)
        .iter()
        .any(|entry| entry.level == LogLevel::Error && entry.message.contains("ledger unavailable")));
}

struct CountingApproval(Arc<AtomicUsize>);

#[async_trait]
impl ApprovalResolver for CountingApproval {
    async fn resolve(
        &self,
        _ctx: &ActivityContext,
        _options: &HashMap<String, String>,
    ) -> Result<ApprovalStatus, FlowError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(ApprovalStatus::Approved)
    }
}

#[tokio::test]
async fn test_completed_gate_steps_are_not_repeated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(
        Engine::new(Arc::new(registry()), RuntimeConfig::default())
            .with_approval_resolver("counting", Arc::new(CountingApproval(Arc::clone(&calls)))),
    );
    let mut definition = FlowDefinition::new("gates");
    definition.add_activity(pass("solo").with_approval(ApprovalSpec::new("once", "counting")));
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let scope = engine.scope(Arc::clone(&flow), Arc::clone(&state), None, CancellationToken::new());
    let activity = flow.activity(&ActivityId::from("solo")).unwrap();
    let ctx = scope.context_for(activity);

    let pipeline = GatePipeline::standard();
    assert_eq!(
        pipeline.run(&scope, activity, &ctx).await.unwrap(),
        StepOutcome::Completed
    );
    assert_eq!(
        pipeline.run(&scope, activity, &ctx).await.unwrap(),
        StepOutcome::Completed
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for step in [WAIT_FOR_CONNECTIONS, READINESS_CHECK, APPROVALS] {
        assert_eq!(state.step_status(&activity.id, step), Some(StepStatus::Completed));
    }
}

#[tokio::test]
async fn test_manual_mode_waits_for_selection() {
    init_tracing();
    let engine = engine();
    let mut definition = chain("manual", &["start"]);
    definition.add_activity(ActivitySpec::new("task", "test.task"));
    definition.add_activity(pass("end"));
    definition.connect("start", "Out", "task", "In");
    definition.connect("task", "Out", "end", "In");
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let manual = Some(ExecutionMode::Manual);

    let outcome = run_state(&engine, &flow, &state, manual).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Paused {
            surfaced: vec![ActivityId::from("task")]
        }
    );
    assert_eq!(status(&state, "start"), Some(ExecutionStatus::Completed));

    // Nothing changes until the task is selected.
    let outcome = run_state(&engine, &flow, &state, manual).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Paused { .. }));

    assert!(state.set_selected(&ActivityId::from("task"), true));
    let outcome = run_state(&engine, &flow, &state, manual).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "end"), Some(ExecutionStatus::Completed));
    assert!(!state.queue_item(&ActivityId::from("task")).unwrap().selected);
}

#[tokio::test]
async fn test_step_mode_runs_one_activity_per_call() {
    let engine = engine();
    let flow = parse(&engine, &chain("steps", &["a", "b", "c"]));
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let step = Some(ExecutionMode::StepByStep);

    let outcome = run_state(&engine, &flow, &state, step).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Paused {
            surfaced: vec![ActivityId::from("b")]
        }
    );
    assert_eq!(status(&state, "b"), Some(ExecutionStatus::Ready));

    let outcome = run_state(&engine, &flow, &state, step).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Paused {
            surfaced: vec![ActivityId::from("c")]
        }
    );

    let outcome = run_state(&engine, &flow, &state, step).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
}

#[tokio::test]
async fn test_automatic_mode_runs_interactive_work() {
    let engine = engine();
    let mut definition = chain("auto", &["start"]);
    definition.add_activity(ActivitySpec::new("task", "test.task"));
    definition.connect("start", "Out", "task", "In");

    let (outcome, state) = run(&engine, &definition, Some(ExecutionMode::Automatic)).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "task"), Some(ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_flow_settings_choose_mode() {
    let engine = engine();
    let definition = chain("steps", &["a", "b"]).with_mode(ExecutionMode::StepByStep);

    let (outcome, _) = run(&engine, &definition, None).await;
    assert!(matches!(outcome, RunOutcome::Paused { .. }));

    let (outcome, _) = run(&engine, &definition, Some(ExecutionMode::Automatic)).await;
    assert_eq!(outcome, RunOutcome::Completed);
}

fn scripted(id: &str, script: &str) -> ActivitySpec {
    ActivitySpec::new(id, SCRIPT_TYPE)
        .with_script(script)
        .with_port(PortDescriptor::output("Out", ValueKind::Any))
        .with_parameter("value", "42")
}

#[tokio::test]
async fn test_script_fires_ports() {
    let engine = engine();
    let mut definition = chain("script", &["start"]);
    definition.add_activity(scripted("script", "Out"));
    definition.add_activity(pass("end"));
    definition.connect("start", "Out", "script", "In");
    definition.connect("script", "Out", "end", "In");

    let (outcome, state) = run(&engine, &definition, None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    let fired = state
        .executed_connections()
        .into_iter()
        .find(|c| c.connection.source.as_str() == "script")
        .unwrap();
    assert_eq!(fired.data.value("data"), Some(Value::Number(42.0)));
    assert!(state
        .logs_for(&ActivityId::from("script"))
        .iter()
        .any(|entry| entry.message == "stub ran"));
}

#[tokio::test]
async fn test_script_failure_is_data() {
    let engine = engine();
    let mut definition = chain("script", &["start"]);
    definition.add_activity(scripted("script", "fail:bad input"));
    definition.add_activity(pass("end"));
    definition.connect("start", "Out", "script", "In");
    definition.connect("script", "Out", "end", "In");

    let (outcome, state) = run(&engine, &definition, None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    let item = state.queue_item(&ActivityId::from("script")).unwrap();
    assert_eq!(item.status, ExecutionStatus::Failed);
    assert_eq!(item.reason.as_deref(), Some("bad input"));
    assert_eq!(status(&state, "end"), None);
    assert_eq!(
        state.step_status(&ActivityId::from("script"), EXECUTE_STEP),
        Some(StepStatus::Failed)
    );
}

#[tokio::test]
async fn test_script_without_evaluator_is_fatal() {
    let engine = Arc::new(Engine::new(Arc::new(registry()), RuntimeConfig::default()));
    let mut definition = FlowDefinition::new("script");
    definition.add_activity(scripted("script", "Out"));
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));

    let result = run_state(&engine, &flow, &state, None).await;

    assert!(matches!(result, Err(FlowError::Execution(_))));
    assert_eq!(status(&state, "script"), Some(ExecutionStatus::Failed));
}

fn composite(id: &str, child: FlowDefinition) -> ActivitySpec {
    ActivitySpec::new(id, COMPOSITE_TYPE)
        .with_flow(child)
        .with_parameter("x", "7")
}

#[tokio::test]
async fn test_composite_returns_child_variables() {
    init_tracing();
    let engine = engine();
    let mut child = FlowDefinition::new("child");
    child.add_activity(ActivitySpec::new("store", "test.store").with_parameter("input", "$param(x)"));

    let mut definition = chain("parent", &["start"]);
    definition.add_activity(composite("sub", child));
    definition.add_activity(pass("end"));
    definition.connect("start", "Out", "sub", "In");
    definition.connect("sub", "Done", "end", "In");

    let (outcome, state) = run(&engine, &definition, None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "end"), Some(ExecutionStatus::Completed));
    let done = state
        .executed_connections()
        .into_iter()
        .find(|c| c.connection.source.as_str() == "sub")
        .unwrap();
    let expected: HashMap<String, Value> =
        [("result".to_string(), Value::Number(7.0))].into_iter().collect();
    assert_eq!(done.data.value("data"), Some(Value::Object(expected)));
    // Child variables stay in the child.
    assert_eq!(state.variable("result"), None);
}

#[tokio::test]
async fn test_composite_reports_child_failure() {
    let engine = engine();
    let mut child = FlowDefinition::new("child");
    child.add_activity(scripted("script", "fail:nope"));

    let mut definition = FlowDefinition::new("parent");
    definition.add_activity(composite("sub", child));
    definition.add_activity(pass("recover"));
    definition.connect("sub", "Failed", "recover", "In");

    let (outcome, state) = run(&engine, &definition, None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(status(&state, "sub"), Some(ExecutionStatus::Completed));
    assert_eq!(status(&state, "recover"), Some(ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_cancelled_run_stops() {
    let engine = engine();
    let flow = parse(&engine, &chain("cancel", &["a", "b"]));
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let token = CancellationToken::new();
    token.cancel();

    let scope = engine.scope(flow, Arc::clone(&state), None, token);
    let outcome = ExecutionCoordinator::new(scope).run().await.unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(status(&state, "a"), Some(ExecutionStatus::Ready));
    assert_eq!(status(&state, "b"), None);
}

#[tokio::test]
async fn test_activity_error_is_fatal() {
    let engine = engine();
    let mut definition = chain("broken", &["start"]);
    definition.add_activity(ActivitySpec::new("broken", "test.broken"));
    definition.connect("start", "Out", "broken", "In");
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));

    let error = run_state(&engine, &flow, &state, None).await.unwrap_err();

    assert!(error.to_string().contains("boom"));
    assert_eq!(status(&state, "broken"), Some(ExecutionStatus::Failed));
    assert_eq!(status(&state, "start"), Some(ExecutionStatus::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_activity_fails_after_batch_settles() {
    let engine = engine();
    let mut definition = FlowDefinition::new("panic");
    definition.add_activity(ActivitySpec::new("boom", "test.panic"));
    definition.add_activity(ActivitySpec::new("slow", "test.slow"));
    let flow = parse(&engine, &definition);
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));

    let error = run_state(&engine, &flow, &state, None).await.unwrap_err();

    assert!(error.to_string().contains("kaboom"));
    assert_eq!(status(&state, "boom"), Some(ExecutionStatus::Failed));
    assert_eq!(status(&state, "slow"), Some(ExecutionStatus::Completed));
    assert_eq!(state.variable("slow_done"), Some(Value::Bool(true)));
    assert!(state
        .logs_for(&ActivityId::from("boom"))
        .iter()
        .any(|entry| entry.level == LogLevel::Error && entry.message.contains("panicked")));
}

#[tokio::test]
async fn test_rearm_of_unqueued_loop_is_dropped() {
    let engine = engine();
    let flow = parse(&engine, &loop_flow(2));
    let state = Arc::new(ExecutionState::new(Uuid::new_v4()));
    let scope = engine.scope(flow, Arc::clone(&state), None, CancellationToken::new());

    scope
        .connections
        .enqueue_connected_activities(
            &scope,
            &ActivityId::from("body"),
            &[ExecutedPort {
                name: "Out".to_string(),
                data: Value::Null,
            }],
        )
        .await
        .unwrap();

    assert_eq!(status(&state, "loop"), None);
    assert_eq!(state.executed_connections().len(), 1);
    assert!(state
        .logs_for(&ActivityId::from("loop"))
        .iter()
        .any(|entry| entry.level == LogLevel::Warning));
}

#[tokio::test]
async fn test_flow_variables_seed_state() {
    let engine = engine();
    let mut definition = FlowDefinition::new("vars");
    definition.add_activity(ActivitySpec::new("store", "test.store").with_parameter("input", "$var(order.id)"));
    definition
        .variables
        .insert("order".to_string(), serde_json::json!({"id": 17}));

    let (outcome, state) = run(&engine, &definition, None).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state.variable("result"), Some(Value::Number(17.0)));
}
