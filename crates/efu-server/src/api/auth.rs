use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use efu_core::{TokenRepository, UserError, UserId};

use super::error::ApiError;
use crate::AppState;

/// The authenticated requester.
///
/// Expects `Authorization: Token <key>` (or `Bearer <key>`). Rejects with 401
/// before any handler logic runs, so ownership checks never see anonymous calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Authentication credentials were not provided."))?;

        let key = token_key(header)
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header."))?;

        match TokenRepository::new(state.db.clone()).authenticate(key).await {
            Ok(user_id) => Ok(Self(user_id)),
            Err(UserError::InvalidToken) => Err(ApiError::unauthorized("Invalid token.")),
            Err(err) => {
                tracing::error!(error = %err, "token lookup failed");
                Err(ApiError::internal("Internal server error"))
            }
        }
    }
}

fn token_key(header: &str) -> Option<&str> {
    let (scheme, key) = header.trim().split_once(' ')?;
    let key = key.trim();
    let known = scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer");
    (known && !key.is_empty() && !key.contains(' ')).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_token_and_bearer_schemes() {
        assert_eq!(token_key("Token abc123"), Some("abc123"));
        assert_eq!(token_key("Bearer abc123"), Some("abc123"));
        assert_eq!(token_key("token  abc123 "), Some("abc123"));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(token_key("abc123"), None);
        assert_eq!(token_key("Basic abc123"), None);
        assert_eq!(token_key("Token "), None);
        assert_eq!(token_key("Token abc 123"), None);
    }
}
