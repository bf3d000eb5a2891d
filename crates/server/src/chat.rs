use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use leaf_core::chat::{ErrorEnvelope, Guide};
use providers::openrouter::{
    compose, map_upstream, Composed, ComposeInput, DEFAULT_REFERRER, DEFAULT_TITLE,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub disease: Option<String>,
    pub confidence: Option<f64>,
    /// Loosely typed on purpose: malformed entries are skipped, never
    /// rejected.
    #[serde(default)]
    pub history: Value,
    #[serde(default)]
    pub force_json: bool,
    pub referrer: Option<String>,
    pub site: Option<String>,
}

fn error_response(status: u16, envelope: ErrorEnvelope) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(json!({"error": envelope}))).into_response()
}

pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let Some(client) = state.chat.as_ref() else {
        return error_response(
            400,
            ErrorEnvelope::local(
                "OPENROUTER_API_KEY is not set. Export it (or add it to .env) and restart the server.",
            ),
        );
    };

    let prompt = match compose(ComposeInput {
        message: &req.message,
        // An empty disease string counts as absent.
        disease: req.disease.clone().filter(|d| !d.is_empty()),
        confidence: req.confidence,
        history: &req.history,
        force_json: req.force_json,
    }) {
        Composed::Canned(reply) => return Json(json!({"reply": reply})).into_response(),
        Composed::Upstream(prompt) => prompt,
    };

    let referrer = req.referrer.as_deref().unwrap_or(DEFAULT_REFERRER);
    let title = req.site.as_deref().unwrap_or(DEFAULT_TITLE);
    let result = client
        .send_chat(&prompt.messages, prompt.json_mode, referrer, title)
        .await;

    if result.is_error() {
        error!(target: "server::chat", "terminal upstream failure: status {}", result.status);
        let (status, envelope) = map_upstream(result.status, &result.raw_body);
        return error_response(status, envelope);
    }

    let content = result.content().unwrap_or("").to_string();
    if content.is_empty() {
        return error_response(502, ErrorEnvelope::local("Empty response from model."));
    }

    if prompt.json_mode {
        if let Ok(guide) = serde_json::from_str::<Guide>(&content) {
            return Json(json!({"guide": guide})).into_response();
        }
        // Malformed strict-JSON output degrades to the raw text rather than
        // failing the request.
    }
    Json(json!({"reply": content})).into_response()
}
