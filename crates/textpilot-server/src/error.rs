use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use textpilot_shared::protocol::ErrorBody;
use textpilot_shared::error::UPSTREAM_ERROR_CODE;
use textpilot_shared::SyncError;

use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Upstream error: {0}")]
    Upstream(UpstreamError),
}

impl From<UpstreamError> for ServerError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotConnected => ServerError::Sync(SyncError::UpstreamDisconnected),
            other => ServerError::Upstream(other),
        }
    }
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::Sync(err) => {
                let status = match err {
                    SyncError::LookupNotFound { .. } => StatusCode::NOT_FOUND,
                    SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    SyncError::SendFailed(_) => StatusCode::BAD_GATEWAY,
                    SyncError::UpstreamDisconnected => StatusCode::SERVICE_UNAVAILABLE,
                    SyncError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code())
            }
            ServerError::Upstream(_) => (StatusCode::BAD_GATEWAY, UPSTREAM_ERROR_CODE),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        warn!(code, status = status.as_u16(), error = %self, "Request failed");

        let body = ErrorBody {
            error: message,
            code: code.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
