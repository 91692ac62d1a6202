//! HTTP front door: a thin axum layer translating requests into registry
//! calls. All domain decisions live behind [`BotRegistry`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::BotState;
use crate::registry::{BotRegistry, RegistryError, StartParams};

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::Duplicate { .. } | RegistryError::InvalidParams(_) => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::ExchangeUnavailable(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct StopParams {
    bot_name: String,
}

#[derive(Debug, Serialize)]
struct BotStatus {
    bot_name: String,
    bot_data: BotState,
}

pub fn router(registry: Arc<BotRegistry>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/start", post(start_bot))
        .route("/stop", post(stop_bot))
        .route("/statuses", get(statuses))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Bind and serve until the process is terminated.
pub async fn run(registry: Arc<BotRegistry>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

async fn home() -> Json<serde_json::Value> {
    Json(json!({ "message": "Trend following bot is ready!" }))
}

async fn start_bot(
    State(registry): State<Arc<BotRegistry>>,
    Json(params): Json<StartParams>,
) -> Result<Json<serde_json::Value>, RegistryError> {
    let bot_name = registry.start(params).await?;
    Ok(Json(json!({
        "message": format!("Bot {bot_name} started successfully!"),
        "bot_name": bot_name,
    })))
}

async fn stop_bot(
    State(registry): State<Arc<BotRegistry>>,
    Json(params): Json<StopParams>,
) -> Result<Json<serde_json::Value>, RegistryError> {
    registry.stop(&params.bot_name).await?;
    Ok(Json(json!({
        "message": format!("Bot {} stopped successfully!", params.bot_name),
    })))
}

async fn statuses(State(registry): State<Arc<BotRegistry>>) -> Json<serde_json::Value> {
    let running_bots: Vec<BotStatus> = registry
        .statuses()
        .await
        .into_iter()
        .map(|(bot_name, bot_data)| BotStatus { bot_name, bot_data })
        .collect();
    Json(json!({ "running_bots": running_bots }))
}
