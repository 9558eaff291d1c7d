//! The out-of-the-box workflow served by the default binary: a scripted
//! solver good enough to exercise every transport path (streaming,
//! recording, playback, pause/resume, fork) with no vendor credentials.
//! Real deployments register their own providers and workflows through
//! the library API.

use std::sync::Arc;

use serde_json::json;

use loom_engine_core::prelude::*;
use loom_engine_core::scaffold::ScaffoldBuilder;

pub const DEFAULT_WORKFLOW: &str = "math";

pub fn register(builder: ScaffoldBuilder) -> ScaffoldBuilder {
    let provider: Arc<dyn AgentProvider> = Arc::new(
        ScriptedProvider::new("scripted", "demo-model")
            .respond("2+2", json!({"answer": "4"}))
            .respond("3+3", json!({"answer": "6"}))
            .respond("solve", json!({"answer": "42"})),
    );

    let solver = Arc::new(AgentSpec::new(
        "solver",
        provider.clone(),
        Schema::object([("answer", Schema::string())]),
        |state| format!("solve: {}", state["goal"].as_str().unwrap_or_default()),
        |output, draft| draft["answer"] = output["answer"].clone(),
    ));

    let math = WorkflowBuilder::new(DEFAULT_WORKFLOW)
        .initial_state(json!({"goal": "", "answer": ""}))
        .on_start(|input, state| state["goal"] = input.clone())
        .run_until(solver, |state| {
            state["answer"].as_str().map(|s| !s.is_empty()).unwrap_or(false)
        })
        .build()
        .expect("demo workflow definition is valid");

    builder.register_provider(provider).register_workflow(math)
}
