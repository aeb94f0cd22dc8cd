use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::telemetry::{IngestError, UnknownChannel};

/// Errors surfaced to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    UnknownChannel(#[from] UnknownChannel),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::UnknownChannel(_) => StatusCode::NOT_FOUND,
            RelayError::Ingest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RelayError::UnknownChannel(_) => "unknown_channel",
            RelayError::Ingest(IngestError::Malformed(_)) => "malformed_message",
            RelayError::Ingest(IngestError::InvalidField { .. }) => "invalid_field",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        warn!("Request rejected: {}", self);

        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
