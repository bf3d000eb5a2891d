use crate::openrouter::config::OpenRouterConfig;
use leaf_core::chat::{is_sentinel, is_transient, ChatMessage, STATUS_NETWORK_FAILURE, STATUS_UNEXPECTED_FAILURE};
use reqwest::{header, Client};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const DEFAULT_REFERRER: &str = "http://localhost";
pub const DEFAULT_TITLE: &str = "Leaf Vision";

const TEMPERATURE: f64 = 0.25;

/// Terminal outcome of one executor run: the last observed upstream
/// response, or a sentinel-status stand-in when every attempt died in
/// transport.
#[derive(Clone, Debug)]
pub struct UpstreamResult {
    pub status: u16,
    pub raw_body: String,
    pub parsed: Option<Value>,
}

impl UpstreamResult {
    fn from_transport_failure(err: &reqwest::Error) -> Self {
        let status = if err.is_timeout() || err.is_connect() {
            STATUS_NETWORK_FAILURE
        } else {
            STATUS_UNEXPECTED_FAILURE
        };
        Self { status, raw_body: err.to_string(), parsed: None }
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Assistant text of the first choice, when present.
    pub fn content(&self) -> Option<&str> {
        self.parsed
            .as_ref()?
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
    }
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http: Client,
    cfg: OpenRouterConfig,
}

impl OpenRouterClient {
    pub fn new(cfg: OpenRouterConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))?,
        );
        let http = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .timeout(cfg.timeout)
            .build()?;
        Ok(Self { http, cfg })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// Performs the completions call with bounded retries: a transient
    /// status or a transport failure is retried up to `max_retries` extra
    /// times, sleeping `backoff_base * attempt` between attempts. Exactly
    /// one terminal result is returned.
    pub async fn send_chat(
        &self,
        messages: &[ChatMessage],
        json_mode: bool,
        referrer: &str,
        title: &str,
    ) -> UpstreamResult {
        let url = format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.cfg.model,
            "messages": messages,
            "temperature": TEMPERATURE,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let max_attempts = self.cfg.max_retries.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match self.attempt(&url, &body, referrer, title).await {
                Ok(res) => res,
                Err(err) => UpstreamResult::from_transport_failure(&err),
            };
            let retryable_failure = is_transient(result.status) || is_sentinel(result.status);
            if !retryable_failure || attempt >= max_attempts {
                if result.is_error() {
                    debug!(
                        target: "providers::openrouter",
                        "terminal upstream status {} after {attempt} attempt(s)", result.status
                    );
                }
                return result;
            }
            let delay = self.cfg.backoff_base * attempt;
            warn!(
                target: "providers::openrouter",
                "attempt {attempt}/{max_attempts} failed with status {}; retrying in {delay:?}",
                result.status
            );
            sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        url: &str,
        body: &Value,
        referrer: &str,
        title: &str,
    ) -> Result<UpstreamResult, reqwest::Error> {
        let resp = self
            .http
            .post(url)
            .header("HTTP-Referer", referrer)
            .header("X-Title", title)
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let raw_body = resp.text().await?;
        let parsed = serde_json::from_str(&raw_body).ok();
        Ok(UpstreamResult { status, raw_body, parsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaf_core::chat::Role;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config(base_url: String, backoff_ms: u64) -> OpenRouterConfig {
        OpenRouterConfig {
            api_key: "test-key".into(),
            base_url,
            model: "test/model".into(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff_base: Duration::from_millis(backoff_ms),
        }
    }

    /// Serves one canned HTTP response per scripted entry, recording each
    /// request's arrival instant, then stops accepting.
    async fn scripted_upstream(
        responses: Vec<(u16, String)>,
    ) -> (String, Arc<Mutex<Vec<Instant>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(Mutex::new(Vec::new()));
        let recorded = hits.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut sock, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                recorded.lock().unwrap().push(Instant::now());
                let mut buf = vec![0u8; 16 * 1024];
                let _ = sock.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(reply.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        (base, hits)
    }

    fn user_turn() -> Vec<ChatMessage> {
        vec![ChatMessage::new(Role::User, "hello upstream")]
    }

    #[tokio::test]
    async fn transient_status_retries_twice_with_growing_delay() {
        let (base, hits) = scripted_upstream(vec![
            (503, "{}".to_string()),
            (503, "{}".to_string()),
            (503, r#"{"error":"still down"}"#.to_string()),
        ])
        .await;
        let client = OpenRouterClient::new(test_config(base, 40)).unwrap();

        let result = client
            .send_chat(&user_turn(), false, DEFAULT_REFERRER, DEFAULT_TITLE)
            .await;

        assert_eq!(result.status, 503);
        assert_eq!(result.raw_body, r#"{"error":"still down"}"#);
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 3, "2 retries means 3 attempts total");
        let first_gap = hits[1] - hits[0];
        let second_gap = hits[2] - hits[1];
        assert!(first_gap >= Duration::from_millis(40), "first gap {first_gap:?}");
        assert!(second_gap >= Duration::from_millis(80), "second gap {second_gap:?}");
        assert!(second_gap > first_gap, "delays must increase");
    }

    #[tokio::test]
    async fn non_transient_status_makes_exactly_one_attempt() {
        let (base, hits) =
            scripted_upstream(vec![(400, r#"{"error":"bad request"}"#.to_string())]).await;
        let client = OpenRouterClient::new(test_config(base, 10)).unwrap();

        let result = client
            .send_chat(&user_turn(), false, DEFAULT_REFERRER, DEFAULT_TITLE)
            .await;

        assert_eq!(result.status, 400);
        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_exposes_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Water early."}}]}"#;
        let (base, _hits) = scripted_upstream(vec![(200, body.to_string())]).await;
        let client = OpenRouterClient::new(test_config(base, 10)).unwrap();

        let result = client
            .send_chat(&user_turn(), false, DEFAULT_REFERRER, DEFAULT_TITLE)
            .await;

        assert_eq!(result.status, 200);
        assert_eq!(result.content(), Some("Water early."));
    }

    #[tokio::test]
    async fn connection_failure_returns_network_sentinel() {
        // Bind then drop to obtain a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let client = OpenRouterClient::new(test_config(base, 5)).unwrap();

        let result = client
            .send_chat(&user_turn(), false, DEFAULT_REFERRER, DEFAULT_TITLE)
            .await;

        assert_eq!(result.status, STATUS_NETWORK_FAILURE);
        assert!(result.parsed.is_none());
        assert!(!result.raw_body.is_empty());
    }
}
