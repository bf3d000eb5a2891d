use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

#[derive(Clone, Debug, Deserialize)]
pub struct OpenRouterFileConfig {
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before retry n is `backoff_base * n`.
    pub backoff_base: Duration,
}

impl OpenRouterConfig {
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY").map_err(|_| {
            anyhow::anyhow!(
                "OPENROUTER_API_KEY is not set. Export it (or add it to .env) and restart the server."
            )
        })?;
        let base_url = env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());

        let mut model = "deepseek/deepseek-chat-v3.1:free".to_string();
        let mut timeout_ms = 45_000u64;
        let mut max_retries = 2u32;
        let mut backoff_ms = 500u64;

        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(raw) = fs::read_to_string(&path) {
                    if let Ok(file_cfg) = toml::from_str::<OpenRouterFileConfig>(&raw) {
                        if let Some(m) = file_cfg.model {
                            model = m;
                        }
                        if let Some(t) = file_cfg.timeout_ms {
                            timeout_ms = t;
                        }
                        if let Some(r) = file_cfg.max_retries {
                            max_retries = r;
                        }
                        if let Some(b) = file_cfg.backoff_ms {
                            backoff_ms = b;
                        }
                    }
                }
            }
        }

        Ok(OpenRouterConfig {
            api_key,
            base_url,
            model,
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
            backoff_base: Duration::from_millis(backoff_ms),
        })
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".leafvision").join("config.toml")
        } else {
            base.config_dir().join("leafvision").join("config.toml")
        };
        Some(p)
    }
}
