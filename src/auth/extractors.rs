use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use tracing::warn;

use crate::auth::verifier::VerifiedIdentity;
use crate::error::ApiError;
use crate::state::AppState;

/// Extracts and verifies the Bearer ID token, yielding the caller's
/// Google identity.
#[derive(Debug)]
pub struct AuthIdentity(pub VerifiedIdentity);

#[async_trait]
impl FromRequestParts<AppState> for AuthIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::Auth("Authorization token is missing".into()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Auth("invalid auth scheme".into()))?;

        match state.verifier.verify(token).await {
            Ok(identity) => Ok(AuthIdentity(identity)),
            Err(err) => {
                warn!(error = %err, "ID token verification failed");
                Err(ApiError::Auth("Invalid Google ID token".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/forest");
        if let Some(v) = value {
            builder = builder.header("Authorization", v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let state = AppState::fake();
        let mut parts = parts_with_auth(None);
        let err = AuthIdentity::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected() {
        let state = AppState::fake();
        let mut parts = parts_with_auth(Some("Basic dXNlcjpwdw=="));
        let err = AuthIdentity::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[tokio::test]
    async fn rejected_token_maps_to_auth_error() {
        let state = AppState::fake();
        let mut parts = parts_with_auth(Some("Bearer definitely-not-valid"));
        let err = AuthIdentity::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[tokio::test]
    async fn verified_token_yields_the_identity() {
        let state = AppState::fake();
        let mut parts = parts_with_auth(Some("Bearer test-token"));
        let AuthIdentity(identity) = AuthIdentity::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(identity.subject, "fake-google-subject");
        assert_eq!(identity.email.as_deref(), Some("fake@example.com"));
    }
}
