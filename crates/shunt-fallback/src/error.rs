use shunt_core::ShuntError;

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("Invalid fallback config: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed fallback config: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] ShuntError),
}
