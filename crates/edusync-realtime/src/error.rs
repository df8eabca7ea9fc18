use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("Realtime socket is not attached")]
    NotAttached,

    #[error("Realtime socket command queue is full")]
    Backpressure,
}
