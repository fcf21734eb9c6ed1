//! Agent error types.

/// Unified error type for the agent crate.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed after exhausting retries.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM response could not be parsed into the expected shape.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The API key is missing for a backend that requires one.
    #[error("missing api key for llm backend")]
    MissingApiKey,

    // -- Loop errors ---------------------------------------------------------
    /// The LLM returned neither tool calls nor text.
    #[error("empty plan: reply had neither tool calls nor text")]
    EmptyPlan,

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
