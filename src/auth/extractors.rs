use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;

use crate::auth::dto::JwtKeys;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::dto::PublicUser;
use crate::users::repo;

/// Resolved request identity: the sanitized user row, with the password
/// hash and refresh token never part of the projection.
pub struct CurrentUser(pub PublicUser);

pub(crate) fn cookie_value(header_value: &str, name: &str) -> Option<String> {
    header_value
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// Access token from the `accessToken` cookie, falling back to a bearer
/// header. Cookie wins when both are present.
pub(crate) fn access_token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        if let Some(token) = cookie_value(cookies, "accessToken") {
            return Some(token);
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(|t| t.to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = access_token_from_headers(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Missing access token".into()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(&token).map_err(|_| {
            warn!("invalid or expired access token");
            ApiError::Unauthorized("Invalid or expired access token".into())
        })?;

        // Stale token for a deleted account resolves to nothing.
        let user = repo::find_public_by_id(&state.db, claims.sub)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))?;

        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_is_used_when_no_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(
            access_token_from_headers(&headers).as_deref(),
            Some("abc.def.ghi")
        );
    }

    #[test]
    fn cookie_wins_over_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=from-cookie; lang=en"),
        );
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            access_token_from_headers(&headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn absent_token_yields_none() {
        let headers = HeaderMap::new();
        assert!(access_token_from_headers(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert!(access_token_from_headers(&headers).is_none());
    }

    #[test]
    fn cookie_parsing_ignores_other_names() {
        assert_eq!(
            cookie_value("refreshToken=r1; accessToken=a1", "accessToken").as_deref(),
            Some("a1")
        );
        assert_eq!(
            cookie_value("refreshToken=r1", "accessToken"),
            None
        );
    }
}
