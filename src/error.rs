use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport unavailable after {attempts} attempt(s): {reason}")]
    TransportUnavailable { attempts: u32, reason: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
