/// Core error type for Sealpost.
///
/// Adapter crates should map their specific errors into this type so the
/// scheduler can record every failure the same way (one delivery-log row).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("letter not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unknown delivery channel: {0:?}")]
    UnknownChannel(String),

    #[error("provider rejected request ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
