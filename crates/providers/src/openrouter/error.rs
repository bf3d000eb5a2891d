use leaf_core::chat::{is_retryable, is_sentinel, ErrorEnvelope};
use serde_json::Value;

const DETAIL_MAX_CHARS: usize = 500;

/// Translates a terminal upstream failure into the local response status and
/// error envelope. Pure: the same (status, raw_body) always maps to the same
/// pair, and nothing in here can fail.
pub fn map_upstream(status: u16, raw_body: &str) -> (u16, ErrorEnvelope) {
    let (local_status, message) = match status {
        401 => (401, "OpenRouter rejected the API key (invalid or missing)."),
        403 => (403, "Access forbidden upstream (key lacks access to this model)."),
        404 => (502, "Model or endpoint not found upstream."),
        429 => (429, "Rate limit reached upstream. Try again shortly."),
        500 | 502 | 503 | 504 => (502, "Upstream service temporarily unavailable."),
        s if is_sentinel(s) => (503, "Network failure contacting upstream."),
        _ => (502, "Upstream rejected the request."),
    };
    let envelope = ErrorEnvelope {
        message: message.to_string(),
        upstream_status: if is_sentinel(status) { None } else { Some(status) },
        retryable: is_retryable(status),
        details: extract_detail(status, raw_body),
    };
    (local_status, envelope)
}

/// Pulls a human-readable message out of common upstream error shapes: a
/// string (or an object carrying `message`) under an `error`, `message`, or
/// `detail` key. Transport failures carry their error text as the body and
/// pass it through directly. Capped at 500 characters.
fn extract_detail(status: u16, raw_body: &str) -> Option<String> {
    let detail = match serde_json::from_str::<Value>(raw_body) {
        Ok(Value::Object(map)) => ["error", "message", "detail"].iter().find_map(|key| {
            match map.get(*key)? {
                Value::String(s) => Some(s.clone()),
                Value::Object(inner) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            }
        }),
        _ if is_sentinel(status) && !raw_body.is_empty() => Some(raw_body.to_string()),
        _ => None,
    };
    detail.map(|d| d.chars().take(DETAIL_MAX_CHARS).collect())
}
