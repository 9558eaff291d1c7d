//! # Loom Engine Core
//!
//! The execution substrate for an event-sourced agentic workflow runtime:
//!
//! - **Event log** ([`event::store::EventStore`]): append-only,
//!   per-session, position-indexed; the canonical record of everything a
//!   session did.
//! - **Event bus** ([`event::bus::EventBus`]): in-process per-session
//!   pub/sub with bounded buffering; producers never block on consumers.
//! - **Workflow runtime** ([`runtime::WorkflowRuntime`]): interprets a
//!   [`workflow::WorkflowDefinition`], invokes agent providers, and
//!   records every transition (append first, publish second).
//! - **Provider contract** ([`provider::AgentProvider`]): a uniform
//!   streaming interface over model backends, with a
//!   [`provider::recording::RecordingProvider`] wrapper that records live
//!   streams and replays them deterministically in playback mode.
//! - **Scaffold** ([`scaffold::Scaffold`]): the session-lifecycle owner
//!   (create, pause, resume, abort, fork, delete); fixes the execution
//!   mode for the whole process.
//! - **Hub** ([`hub::SessionHub`]): the boundary transports attach to.
//!
//! Sessions are replayable by construction: state is derived from the
//! log ([`state::compute_state_at`]), so a paused session can be resumed
//! indefinitely later, forked into a new session, or reconstructed after
//! a crash.
//!
//! ```no_run
//! use std::sync::Arc;
//! use loom_engine_core::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> loom_engine_core::error::Result<()> {
//! let provider = Arc::new(ScriptedProvider::new("scripted", "demo-model")
//!     .respond("2+2", json!({"answer": "4"})));
//!
//! let solver = Arc::new(AgentSpec::new(
//!     "solver",
//!     provider.clone(),
//!     Schema::object([("answer", Schema::string())]),
//!     |state| format!("solve: {}", state["goal"]),
//!     |output, draft| draft["answer"] = output["answer"].clone(),
//! ));
//!
//! let workflow = WorkflowBuilder::new("math")
//!     .initial_state(json!({"goal": "", "answer": ""}))
//!     .on_start(|input, state| state["goal"] = input.clone())
//!     .agent_phase("solve", solver, "done")
//!     .terminal("done")
//!     .build()?;
//!
//! let scaffold = Scaffold::builder()
//!     .mode(ExecutionMode::Live)
//!     .register_provider(provider)
//!     .register_workflow(workflow)
//!     .build();
//!
//! let session_id = scaffold.create_session("math", json!("2+2")).await?;
//! scaffold.wait(session_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod hash;
pub mod hub;
pub mod provider;
pub mod runtime;
pub mod scaffold;
pub mod schema;
pub mod state;
pub mod workflow;

pub use error::{CoreError, ProviderError, Result, ValidationError};
pub use event::{Event, EventName};
pub use scaffold::Scaffold;
pub use state::SessionStatus;

/// Current version of the engine core.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports.
pub mod prelude {
    pub use crate::error::{CoreError, ProviderError, Result, RetryPolicy, ValidationError};
    pub use crate::event::bus::{BusItem, EventBus};
    pub use crate::event::snapshot::{InMemorySnapshotStore, StateSnapshotStore};
    pub use crate::event::store::{EventStore, InMemoryEventStore};
    pub use crate::event::{Event, EventName, NarrativeImportance};
    pub use crate::hub::{EventFilter, SessionHub, Transport};
    pub use crate::provider::recorder::{InMemoryRecorder, ProviderRecorder};
    pub use crate::provider::recording::RecordingProvider;
    pub use crate::provider::scripted::ScriptedProvider;
    pub use crate::provider::{
        AgentProvider, AgentResult, AgentStreamEvent, ExecutionMode, StopReason, StreamOptions,
    };
    pub use crate::runtime::{RunOutcome, RuntimeOptions, WorkflowRuntime};
    pub use crate::scaffold::Scaffold;
    pub use crate::schema::Schema;
    pub use crate::state::{compute_state_at, current_state, SessionStatus};
    pub use crate::workflow::{AgentSpec, WorkflowBuilder, WorkflowDefinition};
}
