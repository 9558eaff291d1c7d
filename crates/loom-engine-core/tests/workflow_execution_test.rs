//! End-to-end runtime execution tests against in-memory stores and the
//! scripted provider: the canonical event sequence, the state reducer,
//! validation fail-fast, continue-on-error, and the retry loop.

use std::sync::Arc;
use std::time::Duration;

use loom_engine_core::error::{ProviderError, RetryPolicy};
use loom_engine_core::event::bus::EventBus;
use loom_engine_core::event::store::{EventStore, InMemoryEventStore};
use loom_engine_core::prelude::*;
use loom_engine_core::provider::recorder::InMemoryRecorder;
use loom_engine_core::runtime::RuntimeContext;
use serde_json::json;
use uuid::Uuid;

fn context(store: Arc<InMemoryEventStore>) -> RuntimeContext {
    RuntimeContext {
        store,
        snapshots: None,
        recorder: Arc::new(InMemoryRecorder::new()),
        mode: ExecutionMode::Live,
        bus: EventBus::new(),
        options: RuntimeOptions::default(),
    }
}

fn solver(provider: Arc<ScriptedProvider>) -> Arc<AgentSpec> {
    Arc::new(AgentSpec::new(
        "solver",
        provider,
        Schema::object([("answer", Schema::string())]),
        |state| format!("solve: {}", state["goal"].as_str().unwrap_or_default()),
        |output, draft| draft["answer"] = output["answer"].clone(),
    ))
}

/// The simplified `until` workflow used by the basic-run scenario.
fn math_workflow(provider: Arc<ScriptedProvider>) -> WorkflowDefinition {
    WorkflowBuilder::new("math")
        .initial_state(json!({"goal": "", "answer": ""}))
        .on_start(|input, state| state["goal"] = input.clone())
        .run_until(solver(provider), |state| {
            state["answer"].as_str().map(|s| !s.is_empty()).unwrap_or(false)
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn basic_run_emits_canonical_sequence() {
    let store = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model").respond("2+2", json!({"answer": "4"})),
    );
    let workflow = Arc::new(math_workflow(provider));
    let session = Uuid::new_v4();

    let runtime = WorkflowRuntime::detached(session, context(store.clone()));
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.state, Some(json!({"goal": "2+2", "answer": "4"})));

    let events = store.events(session).await.unwrap();
    let names: Vec<EventName> = events.iter().map(|e| e.name).collect();
    assert_eq!(
        names,
        vec![
            EventName::WorkflowStarted,
            EventName::StateUpdated,
            EventName::AgentStarted,
            EventName::AgentText,
            EventName::AgentCompleted,
            EventName::StateUpdated,
            EventName::WorkflowCompleted,
        ]
    );

    // Payload spot checks along the sequence.
    assert_eq!(events[0].payload["workflow_name"], "math");
    assert_eq!(events[0].payload["input"], "2+2");
    assert_eq!(
        events[1].payload["state"],
        json!({"goal": "2+2", "answer": ""})
    );
    assert_eq!(events[3].payload["delta"], "4");
    assert_eq!(events[4].payload["output"], json!({"answer": "4"}));
    assert_eq!(
        events[5].payload["state"],
        json!({"goal": "2+2", "answer": "4"})
    );
    assert_eq!(events[6].payload["success"], true);
    assert!(events[6].payload["duration_ms"].is_u64());

    // Reducer agrees with the final intent.
    assert_eq!(
        compute_state_at(&events, events.len()),
        Some(json!({"goal": "2+2", "answer": "4"}))
    );

    // Positions are contiguous from zero.
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.position, i as u64);
    }
}

#[tokio::test]
async fn phased_run_wraps_steps_in_phase_events() {
    let store = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model")
            .respond("plan:", json!({"plan": "add the numbers"}))
            .respond("solve:", json!({"answer": "4"})),
    );
    let planner = Arc::new(AgentSpec::new(
        "planner",
        provider.clone(),
        Schema::object([("plan", Schema::string())]),
        |_state| "plan: 2+2".to_string(),
        |output, draft| draft["plan"] = output["plan"].clone(),
    ));
    let workflow = Arc::new(
        WorkflowBuilder::new("plan-then-solve")
            .initial_state(json!({"goal": "", "plan": "", "answer": ""}))
            .on_start(|input, state| state["goal"] = input.clone())
            .agent_phase("plan", planner, "solve")
            .agent_phase("solve", solver(provider), "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::detached(session, context(store.clone()));
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();
    assert!(outcome.completed);

    let events = store.events(session).await.unwrap();
    let names: Vec<EventName> = events.iter().map(|e| e.name).collect();
    assert_eq!(
        names,
        vec![
            EventName::WorkflowStarted,
            EventName::StateUpdated,
            EventName::PhaseStart,
            EventName::AgentStarted,
            EventName::AgentText,
            EventName::AgentCompleted,
            EventName::StateUpdated,
            EventName::PhaseComplete,
            EventName::PhaseStart,
            EventName::AgentStarted,
            EventName::AgentText,
            EventName::AgentCompleted,
            EventName::StateUpdated,
            EventName::PhaseComplete,
            EventName::WorkflowCompleted,
        ]
    );
    assert_eq!(events[2].payload, json!({"name": "plan", "number": 1}));
    assert_eq!(events[8].payload, json!({"name": "solve", "number": 2}));
    assert_eq!(
        outcome.state,
        Some(json!({"goal": "2+2", "plan": "add the numbers", "answer": "4"}))
    );
}

#[tokio::test]
async fn invalid_output_fails_fast_with_validation_error() {
    let store = Arc::new(InMemoryEventStore::new());
    // Script returns a number where the schema wants a string.
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model").respond("solve:", json!({"answer": 4})),
    );
    let workflow = Arc::new(
        WorkflowBuilder::new("math")
            .initial_state(json!({"goal": "", "answer": ""}))
            .on_start(|input, state| state["goal"] = input.clone())
            .agent_phase("solve", solver(provider), "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::detached(session, context(store.clone()));
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();
    assert!(!outcome.completed);

    let events = store.events(session).await.unwrap();
    let failed = events
        .iter()
        .find(|e| e.name == EventName::AgentFailed)
        .expect("agent:failed emitted");
    assert_eq!(failed.payload["reason"], "VALIDATION_ERROR");
    assert_eq!(failed.payload["path"], "$.answer");

    assert_eq!(events.last().unwrap().name, EventName::WorkflowFailed);
    assert_eq!(events.last().unwrap().payload["code"], "VALIDATION_ERROR");

    // The bad output never became a state intent.
    assert_eq!(
        current_state(&events),
        Some(json!({"goal": "2+2", "answer": ""}))
    );
}

#[tokio::test]
async fn continue_on_error_skips_the_failed_step() {
    let store = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model")
            .respond("solve:", json!({"answer": "4"})),
    );
    // No script matches the optional step's prompt, so it fails.
    let optional = Arc::new(
        AgentSpec::new(
            "annotator",
            provider.clone(),
            Schema::any(),
            |_state| "annotate".to_string(),
            |output, draft| draft["note"] = output.clone(),
        )
        .continue_on_error(),
    );
    let workflow = Arc::new(
        WorkflowBuilder::new("tolerant")
            .initial_state(json!({"goal": "", "answer": ""}))
            .on_start(|input, state| state["goal"] = input.clone())
            .agent_phase("annotate", optional, "solve")
            .agent_phase("solve", solver(provider), "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::detached(session, context(store.clone()));
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();

    assert!(outcome.completed, "workflow completes past the failed step");
    let events = store.events(session).await.unwrap();
    assert!(events.iter().any(|e| e.name == EventName::AgentFailed));
    assert_eq!(events.last().unwrap().name, EventName::WorkflowCompleted);
    assert_eq!(outcome.state.unwrap()["answer"], "4");
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff_events() {
    let store = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model")
            .respond("solve:", json!({"answer": "4"}))
            .fail_first(2, ProviderError::network("connection reset")),
    );
    let workflow = Arc::new(
        WorkflowBuilder::new("math")
            .initial_state(json!({"goal": "", "answer": ""}))
            .on_start(|input, state| state["goal"] = input.clone())
            .agent_phase("solve", solver(provider), "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let mut ctx = context(store.clone());
    ctx.options = RuntimeOptions {
        retry: RetryPolicy {
            initial_delay: Duration::from_millis(5),
            factor: 2.0,
            max_delay: Duration::from_millis(20),
            max_attempts: 5,
            jitter: false,
        },
        step_timeout: None,
    };

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::new(session, ctx, tokio::sync::mpsc::channel(1).1);
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();
    assert!(outcome.completed);

    let events = store.events(session).await.unwrap();
    let retries: Vec<&loom_engine_core::Event> = events
        .iter()
        .filter(|e| e.name == EventName::AgentRetry)
        .collect();
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].payload["attempt"], 1);
    assert_eq!(retries[1].payload["attempt"], 2);
    assert!(retries[0].payload["reason"]
        .as_str()
        .unwrap()
        .contains("connection reset"));

    // One agent:started despite three attempts.
    let starts = events
        .iter()
        .filter(|e| e.name == EventName::AgentStarted)
        .count();
    assert_eq!(starts, 1);
    assert_eq!(events.last().unwrap().name, EventName::WorkflowCompleted);
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_the_workflow() {
    let store = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model")
            .respond("solve:", json!({"answer": "4"}))
            .fail_first(10, ProviderError::network("still down")),
    );
    let workflow = Arc::new(
        WorkflowBuilder::new("math")
            .initial_state(json!({"goal": "", "answer": ""}))
            .agent_phase("solve", solver(provider), "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let mut ctx = context(store.clone());
    ctx.options = RuntimeOptions {
        retry: RetryPolicy {
            initial_delay: Duration::from_millis(1),
            factor: 2.0,
            max_delay: Duration::from_millis(4),
            max_attempts: 3,
            jitter: false,
        },
        step_timeout: None,
    };

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::new(session, ctx, tokio::sync::mpsc::channel(1).1);
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();
    assert!(!outcome.completed);

    let events = store.events(session).await.unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.name == EventName::AgentRetry)
            .count(),
        2
    );
    let failed = events
        .iter()
        .find(|e| e.name == EventName::AgentFailed)
        .unwrap();
    assert_eq!(failed.payload["code"], "NETWORK");
    assert_eq!(events.last().unwrap().name, EventName::WorkflowFailed);
}

#[tokio::test]
async fn step_deadline_surfaces_as_retryable_network_error() {
    let store = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model")
            .respond("solve:", json!({"answer": "4"}))
            .with_delay(Duration::from_secs(30)),
    );
    let slow = Arc::new(
        AgentSpec::new(
            "solver",
            provider,
            Schema::any(),
            |_state| "solve: 2+2".to_string(),
            |_output, _draft| {},
        )
        .with_timeout(Duration::from_millis(20)),
    );
    let workflow = Arc::new(
        WorkflowBuilder::new("slow")
            .agent_phase("solve", slow, "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let mut ctx = context(store.clone());
    ctx.options = RuntimeOptions {
        retry: RetryPolicy {
            max_attempts: 1, // no retries: the timeout should fail the run
            jitter: false,
            ..RetryPolicy::default()
        },
        step_timeout: None,
    };

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::new(session, ctx, tokio::sync::mpsc::channel(1).1);
    let outcome = runtime.execute(workflow, json!(null)).await.unwrap();
    assert!(!outcome.completed);

    let events = store.events(session).await.unwrap();
    let failed = events
        .iter()
        .find(|e| e.name == EventName::AgentFailed)
        .unwrap();
    assert_eq!(failed.payload["code"], "NETWORK");
    assert!(failed.payload["message"]
        .as_str()
        .unwrap()
        .contains("deadline"));
}

#[tokio::test]
async fn tool_and_thinking_events_are_retagged_into_the_log() {
    use loom_engine_core::provider::{AgentStreamEvent, ToolDefinition};

    let store = Arc::new(InMemoryEventStore::new());
    let result = AgentResult::new(json!({"answer": "4"}), StopReason::ToolUse).with_text("4");
    let provider = Arc::new(ScriptedProvider::new("scripted", "test-model").respond_with(
        "solve:",
        vec![
            AgentStreamEvent::ThinkingDelta {
                delta: "let me check".to_string(),
            },
            AgentStreamEvent::ToolCall {
                tool_id: "call-1".to_string(),
                tool_name: "calc".to_string(),
                input: json!({"expr": "2+2"}),
            },
            AgentStreamEvent::ToolResult {
                tool_id: "call-1".to_string(),
                output: json!("4"),
                is_error: false,
            },
            AgentStreamEvent::TextDelta {
                delta: "4".to_string(),
            },
            AgentStreamEvent::Result(result),
        ],
    ));
    let tooled = Arc::new(
        AgentSpec::new(
            "solver",
            provider,
            Schema::object([("answer", Schema::string())]),
            |state| format!("solve: {}", state["goal"].as_str().unwrap_or_default()),
            |output, draft| draft["answer"] = output["answer"].clone(),
        )
        .with_tools(vec![ToolDefinition::named("calc")]),
    );
    let workflow = Arc::new(
        WorkflowBuilder::new("tool-math")
            .initial_state(json!({"goal": "", "answer": ""}))
            .on_start(|input, state| state["goal"] = input.clone())
            .agent_phase("solve", tooled, "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::detached(session, context(store.clone()));
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();
    assert!(outcome.completed);

    let events = store.events(session).await.unwrap();
    let thinking = events
        .iter()
        .find(|e| e.name == EventName::AgentThinking)
        .expect("agent:thinking");
    assert_eq!(thinking.payload["delta"], "let me check");

    let tool_start = events
        .iter()
        .position(|e| e.name == EventName::AgentToolStart)
        .expect("agent:tool:start");
    assert_eq!(events[tool_start].payload["tool_name"], "calc");
    assert_eq!(events[tool_start].payload["input"]["expr"], "2+2");

    let tool_complete = events
        .iter()
        .position(|e| e.name == EventName::AgentToolComplete)
        .expect("agent:tool:complete");
    assert!(tool_start < tool_complete);
    assert_eq!(events[tool_complete].payload["tool_id"], "call-1");
    assert_eq!(events[tool_complete].payload["is_error"], false);
}

#[tokio::test]
async fn nested_workflow_runs_as_task_group() {
    let store = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "test-model")
            .respond("solve:", json!({"answer": "4"}))
            .respond("review:", json!({"approved": true})),
    );
    let reviewer = Arc::new(AgentSpec::new(
        "reviewer",
        provider.clone(),
        Schema::object([("approved", Schema::boolean())]),
        |_state| "review: answer".to_string(),
        |output, draft| draft["approved"] = output["approved"].clone(),
    ));
    let review_flow = Arc::new(
        WorkflowBuilder::new("review")
            .agent_phase("check", reviewer, "end")
            .terminal("end")
            .build()
            .unwrap(),
    );
    let workflow = Arc::new(
        WorkflowBuilder::new("solve-and-review")
            .initial_state(json!({"goal": "", "answer": "", "approved": false}))
            .on_start(|input, state| state["goal"] = input.clone())
            .agent_phase("solve", solver(provider), "review")
            .workflow_phase("review", review_flow, "done")
            .terminal("done")
            .build()
            .unwrap(),
    );

    let session = Uuid::new_v4();
    let runtime = WorkflowRuntime::detached(session, context(store.clone()));
    let outcome = runtime.execute(workflow, json!("2+2")).await.unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.state.as_ref().unwrap()["approved"], true);

    let events = store.events(session).await.unwrap();
    let task_start = events
        .iter()
        .position(|e| e.name == EventName::TaskStart)
        .expect("task:start");
    let task_complete = events
        .iter()
        .position(|e| e.name == EventName::TaskComplete)
        .expect("task:complete");
    assert!(task_start < task_complete);
    assert_eq!(events[task_start].payload["name"], "review");

    // The nested phase ran between the task markers.
    let nested_phase = events
        .iter()
        .position(|e| {
            e.name == EventName::PhaseStart && e.payload["name"] == "check"
        })
        .unwrap();
    assert!(task_start < nested_phase && nested_phase < task_complete);
}
