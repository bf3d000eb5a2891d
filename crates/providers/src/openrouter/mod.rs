mod client;
mod compose;
mod config;
mod error;

pub use client::{OpenRouterClient, UpstreamResult, DEFAULT_REFERRER, DEFAULT_TITLE};
pub use compose::{
    compose, Composed, ComposedPrompt, ComposeInput, GREETING_REPLY, KNOWN_DISEASES, SYSTEM_PROMPT,
    THANKS_REPLY,
};
pub use config::OpenRouterConfig;
pub use error::map_upstream;
