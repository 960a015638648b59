use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{extractors::cookie_value, CurrentUser, JwtKeys},
    error::ApiError,
    media::FilePart,
    response::ApiResponse,
    state::AppState,
    users::{
        dto::{
            AuthData, ChangePasswordRequest, ChannelProfile, LoginRequest, PublicUser,
            RefreshRequest, TokenPairData, UpdateAccountRequest, WatchHistoryItem,
        },
        repo,
        services::{self, non_blank, RegisterFields, RegisterFiles, RegisterOutcome},
    },
};

const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/current-user", get(current_user))
        .route("/update-account", patch(update_account))
        .route("/avatar", patch(update_avatar))
        .route("/cover-image", patch(update_cover_image))
        .route("/channel/:username", get(channel_profile))
        .route("/watch-history", get(watch_history))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

// --- cookies ---

const COOKIE_ATTRIBUTES: &str = "Path=/; HttpOnly; Secure; SameSite=Strict";

fn auth_cookie(name: &str, value: &str) -> anyhow::Result<HeaderValue> {
    Ok(HeaderValue::from_str(&format!(
        "{name}={value}; {COOKIE_ATTRIBUTES}"
    ))?)
}

fn expired_cookie(name: &str) -> anyhow::Result<HeaderValue> {
    Ok(HeaderValue::from_str(&format!(
        "{name}=; {COOKIE_ATTRIBUTES}; Max-Age=0"
    ))?)
}

fn set_token_cookies(access: &str, refresh: &str) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, auth_cookie("accessToken", access)?);
    headers.append(SET_COOKIE, auth_cookie("refreshToken", refresh)?);
    Ok(headers)
}

fn clear_token_cookies() -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, expired_cookie("accessToken")?);
    headers.append(SET_COOKIE, expired_cookie("refreshToken")?);
    Ok(headers)
}

// --- multipart helpers ---

async fn file_part(field: axum::extract::multipart::Field<'_>) -> Result<FilePart, ApiError> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Broken upload: {e}")))?;
    Ok(FilePart { body, content_type })
}

async fn collect_register_form(
    mut mp: Multipart,
) -> Result<(RegisterFields, RegisterFiles), ApiError> {
    let mut fields = RegisterFields::default();
    let mut files = RegisterFiles::default();
    while let Ok(Some(field)) = mp.next_field().await {
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        match name.as_str() {
            "username" => fields.username = field.text().await.ok(),
            "email" => fields.email = field.text().await.ok(),
            "fullName" => fields.full_name = field.text().await.ok(),
            "password" => fields.password = field.text().await.ok(),
            "avatar" => files.avatar = Some(file_part(field).await?),
            "coverImage" => files.cover_image = Some(file_part(field).await?),
            _ => {}
        }
    }
    Ok((fields, files))
}

/// Single required file from a one-field multipart body.
async fn single_file(mut mp: Multipart, field_name: &str) -> Result<Option<FilePart>, ApiError> {
    let mut part = None;
    while let Ok(Some(field)) = mp.next_field().await {
        if field.name() == Some(field_name) {
            part = Some(file_part(field).await?);
        }
    }
    Ok(part)
}

// --- handlers ---

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let (fields, files) = collect_register_form(mp).await?;
    match services::register(&state, fields, files).await? {
        RegisterOutcome::Created(user) => {
            Ok(ApiResponse::created(user, "User registered successfully"))
        }
        RegisterOutcome::Duplicate => {
            warn!("registration for existing username or email");
            Ok(ApiResponse::conflict(
                "User with username or email already exists",
            ))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(HeaderMap, ApiResponse<AuthData>), ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let (user, access_token, refresh_token) = services::login(&state, &keys, &payload).await?;
    let headers = set_token_cookies(&access_token, &refresh_token)?;
    Ok((
        headers,
        ApiResponse::ok(
            AuthData {
                user,
                access_token,
                refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

#[instrument(skip(state, user))]
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<(HeaderMap, ApiResponse<()>), ApiError> {
    repo::clear_refresh_token(&state.db, user.id)
        .await
        .map_err(ApiError::Internal)?;
    info!(user_id = %user.id, "user logged out");
    Ok((
        clear_token_cookies()?,
        ApiResponse::new(StatusCode::OK, None, "User logged out"),
    ))
}

#[instrument(skip_all)]
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<(HeaderMap, ApiResponse<TokenPairData>), ApiError> {
    let from_cookie = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|c| cookie_value(c, "refreshToken"));
    let from_body = payload.and_then(|Json(p)| non_blank(&p.refresh_token).map(str::to_string));
    let incoming = from_cookie
        .or(from_body)
        .ok_or_else(|| ApiError::Unauthorized("Missing refresh token".into()))?;

    let keys = JwtKeys::from_ref(&state);
    let (access_token, refresh_token) = services::rotate(&state.db, &keys, &incoming).await?;
    let headers = set_token_cookies(&access_token, &refresh_token)?;
    Ok((
        headers,
        ApiResponse::ok(
            TokenPairData {
                access_token,
                refresh_token,
            },
            "Access token refreshed",
        ),
    ))
}

#[instrument(skip(state, user, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    services::change_password(
        &state.db,
        user.id,
        &payload.old_password,
        &payload.new_password,
    )
    .await?;
    Ok(ApiResponse::new(
        StatusCode::OK,
        None,
        "Password changed successfully",
    ))
}

#[instrument(skip_all)]
pub async fn current_user(
    CurrentUser(user): CurrentUser,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    Ok(ApiResponse::ok(user, "Current user fetched successfully"))
}

#[instrument(skip(state, user, payload))]
pub async fn update_account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let updated =
        services::update_account(&state.db, user.id, &payload.full_name, &payload.email).await?;
    Ok(ApiResponse::ok(updated, "Account updated successfully"))
}

#[instrument(skip_all)]
pub async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let part = single_file(mp, "avatar")
        .await?
        .ok_or_else(|| ApiError::BadRequest("Avatar file is required".into()))?;
    let stored = crate::media::services::store_image(&state, "avatars", &part)
        .await
        .map_err(|e| ApiError::Internal(e.context("avatar upload")))?;
    let updated = repo::set_avatar(&state.db, user.id, &stored.url)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

#[instrument(skip_all)]
pub async fn update_cover_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let part = single_file(mp, "coverImage")
        .await?
        .ok_or_else(|| ApiError::BadRequest("Cover image file is required".into()))?;
    let stored = crate::media::services::store_image(&state, "covers", &part)
        .await
        .map_err(|e| ApiError::Internal(e.context("cover image upload")))?;
    let updated = repo::set_cover_image(&state.db, user.id, &stored.url)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

#[instrument(skip(state, user))]
pub async fn channel_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> Result<ApiResponse<ChannelProfile>, ApiError> {
    let username = username.trim().to_lowercase();
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".into()));
    }
    let profile = repo::channel_profile(&state.db, &username, user.id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Channel does not exist".into()))?;
    Ok(ApiResponse::ok(profile, "Channel profile fetched"))
}

#[instrument(skip(state, user))]
pub async fn watch_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<ApiResponse<Vec<WatchHistoryItem>>, ApiError> {
    let items: Vec<WatchHistoryItem> = repo::watch_history(&state.db, user.id)
        .await
        .map_err(ApiError::Internal)?
        .into_iter()
        .map(WatchHistoryItem::from)
        .collect();
    Ok(ApiResponse::ok(items, "Watch history fetched"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_cookie_carries_security_attributes() {
        let value = auth_cookie("accessToken", "tok.abc").unwrap();
        let s = value.to_str().unwrap();
        assert!(s.starts_with("accessToken=tok.abc;"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Secure"));
    }

    #[test]
    fn expired_cookie_clears_with_same_attributes() {
        let value = expired_cookie("refreshToken").unwrap();
        let s = value.to_str().unwrap();
        assert!(s.starts_with("refreshToken=;"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Secure"));
        assert!(s.contains("Max-Age=0"));
    }

    #[test]
    fn both_cookies_are_set_and_cleared() {
        let set = set_token_cookies("a", "r").unwrap();
        assert_eq!(set.get_all(SET_COOKIE).iter().count(), 2);

        let cleared = clear_token_cookies().unwrap();
        assert_eq!(cleared.get_all(SET_COOKIE).iter().count(), 2);
        assert!(cleared
            .get_all(SET_COOKIE)
            .iter()
            .all(|v| v.to_str().unwrap().contains("Max-Age=0")));
    }
}
