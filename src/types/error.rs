//! Error types for Usher

/// Main error type for Usher operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum UsherError {
    #[error("Transport spec fetch failed: {0}")]
    ConfigFetch(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The connection was torn down before a reply arrived
    #[error("Connection reset")]
    ConnectionReset,

    #[error("No callback registered for token {0}")]
    CallbackNotFound(String),

    /// The server answered a call with an error in its first argument slot
    #[error("Remote call error: {0}")]
    RemoteCall(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Encode error: {0}")]
    Encode(String),
}

// From conversions for common error types

impl From<std::io::Error> for UsherError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for UsherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for UsherError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for UsherError {
    fn from(err: reqwest::Error) -> Self {
        Self::ConfigFetch(err.to_string())
    }
}

/// Result type alias for Usher operations
pub type Result<T> = std::result::Result<T, UsherError>;
