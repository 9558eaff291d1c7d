//! Non-session endpoints: stored recordings and provider status.

use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::error::ApiError;
use crate::AppState;

#[get("/recordings")]
pub async fn list_recordings(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let recordings = state.scaffold.recordings().await?;
    Ok(HttpResponse::Ok().json(json!({"recordings": recordings})))
}

#[get("/providers/status")]
pub async fn provider_status(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let connected = !state.scaffold.providers().is_empty();
    Ok(HttpResponse::Ok().json(json!({"provider": {"connected": connected}})))
}
