/// Shared error type used across all Fancast crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage: {0}")]
    Storage(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("session {phone}: {message}")]
    Session { phone: String, message: String },

    #[error("channel {channel_id}: {message}")]
    Channel { channel_id: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("engine is shutting down")]
    Shutdown,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for session-scoped errors.
    pub fn session(phone: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Session {
            phone: phone.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
