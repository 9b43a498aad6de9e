// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping of registry errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tally_core::{ErrorCode, TallyError};

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub error: String,
    /// Installed plugins blocking a removal.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<String>,
    /// Validation defects or warnings awaiting confirmation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
}

/// A [`TallyError`] returned from a handler.
#[derive(Debug)]
pub struct ApiError(pub TallyError);

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        Self(err)
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, %code, "request rejected");
        }

        let (dependents, findings) = match &self.0 {
            TallyError::FailedPrecondition { dependents, .. } => (dependents.clone(), Vec::new()),
            TallyError::Validation { defects, .. } => (Vec::new(), defects.clone()),
            TallyError::ConfirmationRequired { warnings, .. } => (Vec::new(), warnings.clone()),
            _ => (Vec::new(), Vec::new()),
        };
        let body = ErrorResponse {
            code,
            error: self.0.to_string(),
            dependents,
            findings,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorCode::FailedPrecondition), StatusCode::PRECONDITION_FAILED);
        assert_eq!(status_for(ErrorCode::PermissionDenied), StatusCode::FORBIDDEN);
    }

    #[test]
    fn dependents_are_exposed() {
        let response = ApiError(TallyError::FailedPrecondition {
            message: "in use".into(),
            dependents: vec!["billing-sync".into()],
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }
}
