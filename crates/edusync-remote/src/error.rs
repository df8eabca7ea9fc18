use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Remote store unreachable")]
    Unreachable,

    #[error("Remote store answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid remote payload: {0}")]
    Decode(#[from] serde_json::Error),
}
