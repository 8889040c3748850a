use std::fmt;

use thiserror::Error;

/// What a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Contact,
    ProfilePicture,
    Message,
    Chat,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Contact => "contact",
            Self::ProfilePicture => "profile picture",
            Self::Message => "message",
            Self::Chat => "chat",
        };
        f.write_str(label)
    }
}

/// Error code for account failures with no [`SyncError`] meaning, such as a
/// transport error during a lookup.
pub const UPSTREAM_ERROR_CODE: &str = "UPSTREAM_ERROR";

/// Failures of the synchronization core.
///
/// Closing an already closed subscription is not an error and has no variant.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Upstream connection lost")]
    UpstreamDisconnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("No {kind} found for {id}")]
    LookupNotFound { kind: LookupKind, id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn not_found(kind: LookupKind, id: impl fmt::Display) -> Self {
        Self::LookupNotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UpstreamDisconnected => "UPSTREAM_DISCONNECTED",
            Self::SendFailed(_) => "SEND_FAILED",
            Self::LookupNotFound { .. } => "LOOKUP_NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
