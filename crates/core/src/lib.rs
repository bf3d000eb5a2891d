pub mod chat {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
        Assistant,
        System,
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub struct ChatMessage {
        pub role: Role,
        pub content: String,
    }

    impl ChatMessage {
        pub fn new(role: Role, content: impl Into<String>) -> Self {
            Self { role, content: content.into() }
        }
    }

    /// History is trimmed to the most recent turns before prompting.
    pub const HISTORY_MAX_TURNS: usize = 8;
    /// Per-turn content cap, in characters.
    pub const TURN_MAX_CHARS: usize = 4000;

    /// Upstream statuses judged likely to succeed on retry.
    pub const TRANSIENT_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

    /// Synthetic terminal status when every attempt died on a timeout or
    /// connection failure.
    pub const STATUS_NETWORK_FAILURE: u16 = 599;
    /// Synthetic terminal status for any other transport-level failure.
    pub const STATUS_UNEXPECTED_FAILURE: u16 = 598;

    pub fn is_transient(status: u16) -> bool {
        TRANSIENT_STATUSES.contains(&status)
    }

    pub fn is_sentinel(status: u16) -> bool {
        status == STATUS_NETWORK_FAILURE || status == STATUS_UNEXPECTED_FAILURE
    }

    pub fn is_retryable(status: u16) -> bool {
        is_transient(status) || status == STATUS_NETWORK_FAILURE
    }

    /// Uniform error body returned by the chat endpoint for every failure
    /// class, local or upstream.
    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub struct ErrorEnvelope {
        pub message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub upstream_status: Option<u16>,
        pub retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub details: Option<String>,
    }

    impl ErrorEnvelope {
        /// Envelope for a failure that never reached the upstream
        /// (configuration problems, handler-level errors).
        pub fn local(message: impl Into<String>) -> Self {
            Self {
                message: message.into(),
                upstream_status: None,
                retryable: false,
                details: None,
            }
        }

        pub fn upstream(message: impl Into<String>, status: u16, details: Option<String>) -> Self {
            Self {
                message: message.into(),
                upstream_status: Some(status),
                retryable: is_retryable(status),
                details,
            }
        }
    }

    /// Strict-JSON full guide shape the model is asked for when a disease is
    /// known. Unknown keys in the model output are dropped; missing lists
    /// default to empty so the response always carries all five members.
    #[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
    pub struct Guide {
        #[serde(default)]
        pub causes: Vec<String>,
        #[serde(default)]
        pub prevention: Vec<String>,
        #[serde(default)]
        pub treatment: Vec<String>,
        #[serde(default)]
        pub risk_factors: Vec<String>,
        #[serde(default)]
        pub short_description: String,
    }

    /// Filters loosely-typed history into well-formed turns: only user and
    /// assistant roles with non-empty text survive, in original order,
    /// truncated to the last [`HISTORY_MAX_TURNS`] entries with content
    /// capped at [`TURN_MAX_CHARS`] characters. Anything malformed is
    /// dropped silently; a non-array value yields an empty history.
    pub fn sanitize_history(history: &Value) -> Vec<ChatMessage> {
        let Some(entries) = history.as_array() else {
            return Vec::new();
        };
        let skip = entries.len().saturating_sub(HISTORY_MAX_TURNS);
        entries
            .iter()
            .skip(skip)
            .filter_map(|entry| {
                let role = match entry.get("role").and_then(Value::as_str) {
                    Some("user") => Role::User,
                    Some("assistant") => Role::Assistant,
                    _ => return None,
                };
                let content = entry.get("content").and_then(Value::as_str)?.trim();
                if content.is_empty() {
                    return None;
                }
                let capped: String = content.chars().take(TURN_MAX_CHARS).collect();
                Some(ChatMessage::new(role, capped))
            })
            .collect()
    }
}

pub mod vision {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub struct TopPrediction {
        pub label: String,
        pub confidence: f64,
    }

    /// Classification result for a single image: the arg-max label plus the
    /// top-ranked alternatives, confidence-descending, at most three.
    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub struct Prediction {
        pub label: String,
        pub confidence: f64,
        pub top: Vec<TopPrediction>,
    }

    /// Confidences are rounded to four decimal digits at the API boundary.
    pub fn round4(x: f64) -> f64 {
        (x * 10_000.0).round() / 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::chat::*;
    use super::vision::round4;
    use serde_json::{json, Value};

    #[test]
    fn sanitize_keeps_only_valid_roles_in_order() {
        let history = json!([
            {"role": "user", "content": "first"},
            {"role": "system", "content": "nope"},
            {"role": "assistant", "content": "second"},
            {"role": "tool", "content": "nope"},
            "not an object",
            {"role": "user", "content": "   "},
            {"role": "user", "content": 42},
            {"role": "assistant", "content": "third"},
        ]);
        let turns = sanitize_history(&history);
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[test]
    fn sanitize_caps_to_last_eight_turns() {
        let entries: Vec<Value> = (0..12)
            .map(|i| json!({"role": "user", "content": format!("m{i}")}))
            .collect();
        let turns = sanitize_history(&Value::Array(entries));
        assert_eq!(turns.len(), HISTORY_MAX_TURNS);
        assert_eq!(turns[0].content, "m4");
        assert_eq!(turns[7].content, "m11");
    }

    #[test]
    fn sanitize_trims_then_caps_content_length() {
        let long = format!("  {}  ", "x".repeat(TURN_MAX_CHARS + 100));
        let history = json!([{"role": "user", "content": long}]);
        let turns = sanitize_history(&history);
        assert_eq!(turns[0].content.chars().count(), TURN_MAX_CHARS);
    }

    #[test]
    fn sanitize_tolerates_non_array_history() {
        assert!(sanitize_history(&json!({"role": "user"})).is_empty());
        assert!(sanitize_history(&Value::Null).is_empty());
    }

    #[test]
    fn retryable_matches_transient_set_and_network_sentinel() {
        for status in TRANSIENT_STATUSES {
            assert!(is_retryable(status), "{status} should be retryable");
        }
        assert!(is_retryable(STATUS_NETWORK_FAILURE));
        assert!(!is_retryable(STATUS_UNEXPECTED_FAILURE));
        assert!(!is_retryable(401));
        assert!(!is_retryable(200));
    }

    #[test]
    fn envelope_omits_absent_optional_fields() {
        let v = serde_json::to_value(ErrorEnvelope::local("boom")).unwrap();
        assert_eq!(v, json!({"message": "boom", "retryable": false}));

        let v = serde_json::to_value(ErrorEnvelope::upstream("late", 503, Some("d".into()))).unwrap();
        assert_eq!(
            v,
            json!({"message": "late", "upstream_status": 503, "retryable": true, "details": "d"})
        );
    }

    #[test]
    fn guide_fills_missing_members_with_defaults() {
        let g: Guide = serde_json::from_str(r#"{"causes": ["wet leaves"]}"#).unwrap();
        assert_eq!(g.causes, vec!["wet leaves"]);
        assert!(g.prevention.is_empty());
        assert!(g.short_description.is_empty());
        let v = serde_json::to_value(&g).unwrap();
        for key in ["causes", "prevention", "treatment", "risk_factors", "short_description"] {
            assert!(v.get(key).is_some(), "{key} must always serialize");
        }
    }

    #[test]
    fn round4_rounds_at_the_boundary() {
        assert_eq!(round4(0.123_456), 0.1235);
        assert_eq!(round4(0.99999), 1.0);
        assert_eq!(round4(0.0), 0.0);
    }
}
