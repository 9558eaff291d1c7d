//! Loom engine server binary.
//!
//! Wires the stores (SQLite when `LOOM_DB_PATH` is set, in-memory
//! otherwise), a scaffold in the configured execution mode, the demo
//! workflow, and the HTTP/SSE transport.

mod config;
mod demo;

use std::io;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use loom_engine_api::{init_routes, AppState};
use loom_engine_core::Scaffold;
use loom_engine_store::Database;

use config::AppConfig;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let mut builder = Scaffold::builder().mode(config.mode);
    match &config.db_path {
        Some(path) => {
            info!(path = %path.display(), "using sqlite stores");
            let db = Database::open(path)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            builder = builder
                .store(db.event_store())
                .snapshots(db.snapshot_store())
                .recorder(db.recorder());
        }
        None => info!("LOOM_DB_PATH unset; using in-memory stores"),
    }

    let scaffold = demo::register(builder).build();
    let state = AppState::new(scaffold.clone(), demo::DEFAULT_WORKFLOW);

    let addr = config.bind_addr();
    info!(host = %addr.0, port = addr.1, mode = %config.mode, "starting server");

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(init_routes)
    })
    .bind(addr)?
    .run();

    let result = server.await;
    scaffold.dispose().await;
    result
}
