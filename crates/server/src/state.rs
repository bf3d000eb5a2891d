use crate::groups::GroupLayer;
use providers::openrouter::OpenRouterClient;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use vision::Classifier;

#[derive(Clone)]
pub struct AppState {
    /// None while OPENROUTER_API_KEY is absent; chat then answers 400 with a
    /// setup hint instead of calling upstream.
    pub chat: Option<OpenRouterClient>,
    /// Shared lazily-loaded classifier; exactly one load per process.
    pub classifier: Arc<OnceCell<Arc<Classifier>>>,
    pub model_dir: PathBuf,
    /// Injected group pub/sub; None refuses WebSocket sessions.
    pub groups: Option<Arc<dyn GroupLayer>>,
}

impl AppState {
    pub fn new(
        chat: Option<OpenRouterClient>,
        model_dir: PathBuf,
        groups: Option<Arc<dyn GroupLayer>>,
    ) -> Self {
        Self {
            chat,
            classifier: Arc::new(OnceCell::new()),
            model_dir,
            groups,
        }
    }
}
