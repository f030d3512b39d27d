use thiserror::Error;

/// CDP client errors.
#[derive(Debug, Error)]
pub enum CdpError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("browser not reachable at {0}")]
    BrowserNotAvailable(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("protocol error: {message} (code {code})")]
    Protocol { code: i64, message: String },

    #[error("javascript exception: {0}")]
    JavaScript(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for CdpError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CdpError::WebSocket(e.to_string())
    }
}

impl From<reqwest::Error> for CdpError {
    fn from(e: reqwest::Error) -> Self {
        CdpError::Http(e.to_string())
    }
}
