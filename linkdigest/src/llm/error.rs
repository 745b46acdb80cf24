use common::ConfigError;

/// Errors raised by the summarization engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// Invalid bounds or missing key, surfaced before any call
    #[error("ConfigurationError: {0}")]
    Config(#[from] ConfigError),

    /// Network failure or timeout within one attempt
    #[error("TransportError: {0}")]
    Transport(String),

    /// Non-success API response
    #[error("ProviderError: status {status}: {message}")]
    Provider { status: u16, message: String },

    /// Model text that does not hold a usable `brief`/`summary` object
    #[error("ParseError: {0}")]
    Parse(String),

    /// Fallback search exhausted every candidate model
    #[error(
        "ModelUnavailableError: model is unavailable and fallback failed. \
         configured={configured}, available_sample=[{available_sample}], last_error={last_error}"
    )]
    ModelUnavailable {
        configured: String,
        available_sample: String,
        last_error: String,
    },

    #[error("All content chunks failed to summarize")]
    ChunkAggregation,
}

impl LlmError {
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether the provider rejected the requested model as unknown or unable
    /// to generate. Providers only report this through status and message text.
    pub fn is_model_unavailable(&self) -> bool {
        match self {
            LlmError::Provider { status, message } => {
                let message = message.to_lowercase();
                message.contains("not found")
                    || message.contains("not supported for generatecontent")
                    || (*status == 404 && message.contains("model"))
            }
            _ => false,
        }
    }

    /// Everything except terminal conditions is retried, including provider
    /// errors caused by malformed requests.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            LlmError::Config(_) | LlmError::ModelUnavailable { .. } | LlmError::ChunkAggregation
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Transport(format!("request timed out: {}", err))
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}
