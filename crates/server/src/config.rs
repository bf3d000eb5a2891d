use std::{env, net::SocketAddr, path::PathBuf};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Directory holding the pretrained classifier artifacts.
    pub model_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind = env::var("LEAF_BIND")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid LEAF_BIND: {e}"))?;
        let model_dir = env::var("LEAF_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models/crop_leaf_diseases_vit"));
        Ok(Self { bind, model_dir })
    }
}
