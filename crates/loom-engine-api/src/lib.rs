//! # Loom Engine API
//!
//! The default HTTP transport over a [`Scaffold`]: a small REST surface
//! for session lifecycle plus an SSE feed of the per-session event
//! stream. The transport holds no state of its own; every request is a
//! call into the scaffold, and the event feed is a bus subscription
//! encoded as `text/event-stream`.
//!
//! Mount with [`init_routes`]:
//!
//! ```no_run
//! use actix_web::{web, App, HttpServer};
//! use loom_engine_api::{init_routes, AppState};
//!
//! # async fn serve(state: AppState) -> std::io::Result<()> {
//! HttpServer::new(move || {
//!     App::new()
//!         .app_data(web::Data::new(state.clone()))
//!         .configure(init_routes)
//! })
//! .bind(("127.0.0.1", 8080))?
//! .run()
//! .await
//! # }
//! ```

pub mod error;
pub mod sessions;
pub mod sse;
pub mod system;

use actix_web::web;
use loom_engine_core::Scaffold;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub scaffold: Scaffold,
    /// Workflow used by `POST /sessions` when the request names none.
    pub default_workflow: String,
}

impl AppState {
    pub fn new(scaffold: Scaffold, default_workflow: impl Into<String>) -> Self {
        Self {
            scaffold,
            default_workflow: default_workflow.into(),
        }
    }
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(sessions::create_session)
        .service(sessions::list_sessions)
        .service(sessions::get_session)
        .service(sessions::get_session_state)
        .service(sessions::session_events)
        .service(sessions::session_input)
        .service(sessions::pause_session)
        .service(sessions::resume_session)
        .service(sessions::fork_session)
        .service(sessions::delete_session)
        .service(system::list_recordings)
        .service(system::provider_status);
}
