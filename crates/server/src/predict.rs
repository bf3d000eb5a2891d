use crate::state::AppState;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use vision::{Classifier, VisionError};

const UPLOAD_FIELD: &str = "image";

fn error_text(status: StatusCode, message: String) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

pub async fn predict(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut upload: Option<axum::body::Bytes> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some(UPLOAD_FIELD) {
                    match field.bytes().await {
                        Ok(bytes) => {
                            upload = Some(bytes);
                            break;
                        }
                        Err(err) => {
                            return error_text(
                                StatusCode::BAD_REQUEST,
                                format!("Failed to read upload: {err}"),
                            )
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                return error_text(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid multipart body: {err}"),
                )
            }
        }
    }
    let Some(bytes) = upload else {
        return error_text(
            StatusCode::BAD_REQUEST,
            format!("No image uploaded with key '{UPLOAD_FIELD}'"),
        );
    };

    let classifier = match load_classifier(&state).await {
        Ok(classifier) => classifier,
        Err(err) => {
            error!(target: "server::predict", "classifier unavailable: {err}");
            return error_text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    // The forward pass is blocking CPU work; keep it off the async workers.
    match tokio::task::spawn_blocking(move || classifier.predict_bytes(&bytes)).await {
        Ok(Ok(prediction)) => Json(prediction).into_response(),
        Ok(Err(err)) => {
            error!(target: "server::predict", "inference failed: {err}");
            error_text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        Err(err) => error_text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Inference task failed: {err}"),
        ),
    }
}

/// One load per process: concurrent first requests share a single
/// initialization, and a failed load is retried on the next request.
async fn load_classifier(state: &AppState) -> Result<Arc<Classifier>, VisionError> {
    state
        .classifier
        .get_or_try_init(|| {
            let dir = state.model_dir.clone();
            async move {
                tokio::task::spawn_blocking(move || Classifier::load(&dir).map(Arc::new))
                    .await
                    .map_err(|e| VisionError::Load(e.to_string()))?
            }
        })
        .await
        .map(Arc::clone)
}
