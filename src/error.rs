use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::sync::engine::SyncError;

/// Request-level failure. Handlers and extractors funnel into this so the
/// HTTP mapping lives in one place; every body is `{"message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unverifiable credential. Rejected before touching the
    /// store.
    #[error("{0}")]
    Auth(String),

    /// Reconciliation refused the submitted forest, or the store failed
    /// underneath it.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Everything else, persistence included. Details go to the log, not
    /// the client.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Auth(message) => (StatusCode::UNAUTHORIZED, message.clone()),
            ApiError::Sync(
                err @ (SyncError::ProjectNotFound { .. }
                | SyncError::EventNotFound { .. }
                | SyncError::TodoNotFound { .. }),
            ) => (StatusCode::CONFLICT, err.to_string()),
            ApiError::Sync(SyncError::Store(err)) => {
                error!(error = %err, "sync aborted by store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ApiError::Internal(err) => {
                error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_unauthorized() {
        let response = ApiError::Auth("Authorization token is missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn stale_submissions_are_conflicts() {
        let err = ApiError::Sync(SyncError::ProjectNotFound { id: 4, user_id: 1 });
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn store_failures_stay_internal() {
        let err = ApiError::Sync(SyncError::Store(anyhow::anyhow!("connection reset")));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
