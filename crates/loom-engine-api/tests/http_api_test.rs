//! HTTP surface tests: request/response shapes, status mapping, the SSE
//! feed, and the interactive input round trip.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use loom_engine_api::{init_routes, AppState};
use loom_engine_core::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

fn solver(provider: Arc<dyn AgentProvider>) -> Arc<AgentSpec> {
    Arc::new(AgentSpec::new(
        "solver",
        provider,
        Schema::object([("answer", Schema::string())]),
        |state| format!("solve: {}", state["goal"].as_str().unwrap_or_default()),
        |output, draft| draft["answer"] = output["answer"].clone(),
    ))
}

fn math_workflow(provider: Arc<dyn AgentProvider>) -> WorkflowDefinition {
    WorkflowBuilder::new("math")
        .initial_state(json!({"goal": "", "answer": ""}))
        .on_start(|input, state| state["goal"] = input.clone())
        .run_until(solver(provider), |state| {
            state["answer"].as_str().map(|s| !s.is_empty()).unwrap_or(false)
        })
        .build()
        .unwrap()
}

fn confirm_workflow(provider: Arc<dyn AgentProvider>) -> WorkflowDefinition {
    WorkflowBuilder::new("confirm-math")
        .initial_state(json!({"goal": "", "confirmed": "", "answer": ""}))
        .on_start(|input, state| state["goal"] = input.clone())
        .prompt_phase(
            "confirm",
            |state| format!("really solve {}?", state["goal"].as_str().unwrap_or_default()),
            Some(vec!["yes".to_string(), "no".to_string()]),
            |reply, draft| draft["confirmed"] = json!(reply.choice.as_deref().unwrap_or("")),
            "solve",
        )
        .agent_phase("solve", solver(provider), "done")
        .terminal("done")
        .build()
        .unwrap()
}

fn test_scaffold() -> Scaffold {
    let provider: Arc<dyn AgentProvider> = Arc::new(
        ScriptedProvider::new("scripted", "test-model").respond("2+2", json!({"answer": "4"})),
    );
    Scaffold::builder()
        .register_provider(provider.clone())
        .register_workflow(math_workflow(provider.clone()))
        .register_workflow(confirm_workflow(provider))
        .build()
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(init_routes),
        )
        .await
    };
}

async fn wait_for_event(scaffold: &Scaffold, session: Uuid, name: EventName) {
    for _ in 0..200 {
        let events = scaffold.events(session).await.unwrap();
        if events.iter().any(|e| e.name == name) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {name}");
}

#[actix_web::test]
async fn create_list_inspect_and_read_state() {
    let scaffold = test_scaffold();
    let state = AppState::new(scaffold.clone(), "math");
    let app = app!(state);

    // Create.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/sessions")
            .set_json(json!({"input": "2+2"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    let session = Uuid::parse_str(body["sessionId"].as_str().unwrap()).unwrap();

    scaffold.wait(session).await.unwrap();

    // List contains the session.
    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/sessions").to_request(),
    )
    .await;
    assert!(body["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == &json!(session)));

    // Inspect: completed, so not running.
    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/sessions/{session}"))
            .to_request(),
    )
    .await;
    assert_eq!(body["running"], false);

    // Current state.
    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/sessions/{session}/state"))
            .to_request(),
    )
    .await;
    assert_eq!(body["state"], json!({"goal": "2+2", "answer": "4"}));
    assert_eq!(body["position"], 7);

    // Positional state read.
    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/sessions/{session}/state?position=2"))
            .to_request(),
    )
    .await;
    assert_eq!(body["state"], json!({"goal": "2+2", "answer": ""}));
    assert_eq!(body["position"], 2);
}

#[actix_web::test]
async fn unknown_and_malformed_sessions_map_to_404_and_400() {
    let state = AppState::new(test_scaffold(), "math");
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/sessions/{}", Uuid::new_v4()))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 404);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/sessions/not-a-uuid/state")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);

    // Unknown workflow on create is 404 too.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/sessions")
            .set_json(json!({"input": "2+2", "workflow": "nope"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn delete_is_idempotent_even_for_unknown_sessions() {
    let state = AppState::new(test_scaffold(), "math");
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/sessions/{}", Uuid::new_v4()))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["ok"], true);
}

#[actix_web::test]
async fn fork_reports_copied_event_count() {
    let scaffold = test_scaffold();
    let state = AppState::new(scaffold.clone(), "math");
    let app = app!(state);

    let session = scaffold.create_session("math", json!("2+2")).await.unwrap();
    scaffold.wait(session).await.unwrap();
    let original = scaffold.events(session).await.unwrap();

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/sessions/{session}/fork"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["eventsCopied"], original.len());
    let fork = Uuid::parse_str(body["sessionId"].as_str().unwrap()).unwrap();
    assert_ne!(fork, session);
    assert_eq!(
        scaffold.events(fork).await.unwrap().len(),
        original.len()
    );
}

#[actix_web::test]
async fn input_resolves_an_open_prompt() {
    let scaffold = test_scaffold();
    let state = AppState::new(scaffold.clone(), "confirm-math");
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/sessions")
            .set_json(json!({"input": "2+2"}))
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    let session = Uuid::parse_str(body["sessionId"].as_str().unwrap()).unwrap();

    wait_for_event(&scaffold, session, EventName::SessionPrompt).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/sessions/{session}/input"))
            .set_json(json!({"input": "go ahead", "choice": "yes"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let outcome = scaffold.wait(session).await.unwrap().unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.state.unwrap()["confirmed"], "yes");
}

#[actix_web::test]
async fn pause_and_resume_round_trip_over_http() {
    let slow: Arc<dyn AgentProvider> = Arc::new(
        ScriptedProvider::new("scripted", "test-model")
            .respond("2+2", json!({"answer": "4"}))
            .with_delay(Duration::from_millis(30)),
    );
    let scaffold = Scaffold::builder()
        .register_workflow(math_workflow(slow))
        .build();
    let state = AppState::new(scaffold.clone(), "math");
    let app = app!(state);

    let session = scaffold.create_session("math", json!("2+2")).await.unwrap();
    wait_for_event(&scaffold, session, EventName::AgentStarted).await;

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri(&format!("/sessions/{session}/pause"))
            .to_request(),
    )
    .await;
    assert_eq!(body["wasPaused"], true);

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri(&format!("/sessions/{session}/resume"))
            .to_request(),
    )
    .await;
    assert_eq!(body["wasResumed"], true);

    let outcome = scaffold.wait(session).await.unwrap().unwrap();
    assert!(outcome.completed);
}

#[actix_web::test]
async fn sse_history_feed_replays_the_whole_log() {
    let scaffold = test_scaffold();
    let state = AppState::new(scaffold.clone(), "math");
    let app = app!(state);

    let session = scaffold.create_session("math", json!("2+2")).await.unwrap();
    scaffold.wait(session).await.unwrap();

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/sessions/{session}/events?history=true"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    // The session is terminal, so the stream ends after the replay.
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    let event_lines: Vec<&str> = body
        .lines()
        .filter(|l| l.starts_with("event: "))
        .collect();
    assert_eq!(event_lines.first(), Some(&"event: workflow:started"));
    assert_eq!(event_lines.last(), Some(&"event: workflow:completed"));
    assert_eq!(event_lines.len(), 7);

    // Each data line is the event wire format.
    let first_data = body
        .lines()
        .find(|l| l.starts_with("data: "))
        .unwrap()
        .strip_prefix("data: ")
        .unwrap();
    let wire: Value = serde_json::from_str(first_data).unwrap();
    assert_eq!(wire["name"], "workflow:started");
    assert_eq!(wire["position"], 0);
}

#[actix_web::test]
async fn recordings_and_provider_status_endpoints() {
    let scaffold = test_scaffold();
    let state = AppState::new(scaffold.clone(), "math");
    let app = app!(state);

    let session = scaffold.create_session("math", json!("2+2")).await.unwrap();
    scaffold.wait(session).await.unwrap();

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/recordings").to_request(),
    )
    .await;
    let recordings = body["recordings"].as_array().unwrap();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0]["provider"], "scripted");
    assert_eq!(recordings[0]["complete"], true);

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/providers/status").to_request(),
    )
    .await;
    assert_eq!(body["provider"]["connected"], true);
}
