pub mod openai;

pub use openai::{OpenAiChatModel, OpenAiConfig};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("missing API key (set {0})")]
    MissingApiKey(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode response: {0}")]
    Decode(String),
    #[error("response contained no content")]
    EmptyResponse,
}

impl ModelError {
    /// Worth another attempt: timeouts, connection failures, rate limits and 5xx.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) | Self::EmptyResponse => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::MissingApiKey(_) | Self::Decode(_) => false,
        }
    }
}

/// Text generation capability behind the refinement and extraction stages.
pub trait ChatModel {
    fn name(&self) -> &str;

    fn chat(
        &mut self,
        system_prompt: Option<&str>,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ModelError::Timeout.is_transient());
        let status = |status: u16| ModelError::Status {
            status,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(401).is_transient());
        assert!(!ModelError::MissingApiKey("OPENAI_API_KEY".into()).is_transient());
    }
}
