use thiserror::Error;

use textpilot_shared::SyncError;

/// Errors produced by the client library.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A failure the server reported with a known meaning (lookup miss,
    /// failed send, invalid request).
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The account failed a request for a reason other than a refused send,
    /// such as a transport error during a lookup.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The server answered with a status the client has no mapping for.
    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// The event stream broke before the server closed it.
    #[error("Stream error: {0}")]
    Stream(String),

    /// `send_draft` was called with nothing to send.
    #[error("Nothing to send: {0}")]
    NothingToSend(&'static str),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// True for a lookup that found nothing (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Sync(SyncError::LookupNotFound { .. }))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
