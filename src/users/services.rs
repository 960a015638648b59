use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::services::{is_valid_email, verify_password};
use crate::auth::JwtKeys;
use crate::error::ApiError;
use crate::media::services::{discard_image, store_image};
use crate::media::FilePart;
use crate::state::AppState;
use crate::users::dto::{LoginRequest, PublicUser};
use crate::users::repo::{self, NewUser};

/// Collected text fields of the registration form.
#[derive(Debug, Default)]
pub struct RegisterFields {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
}

/// Uploaded files, one explicit optional slot per named field.
#[derive(Debug, Default)]
pub struct RegisterFiles {
    pub avatar: Option<FilePart>,
    pub cover_image: Option<FilePart>,
}

/// Duplicate users are a reportable outcome, not an error.
pub enum RegisterOutcome {
    Created(PublicUser),
    Duplicate,
}

/// Trimmed non-empty value of an optional field.
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// A presented refresh token is valid only while it is byte-equal to the
/// single token stored on the user. Rotated-out tokens stop matching even
/// before they expire.
pub(crate) fn refresh_token_matches(stored: Option<&str>, presented: &str) -> bool {
    stored == Some(presented)
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// Sign both tokens and persist the refresh one on the user row.
pub async fn issue_pair(
    db: &PgPool,
    keys: &JwtKeys,
    user_id: Uuid,
) -> Result<(String, String), ApiError> {
    let access = keys.sign_access(user_id)?;
    let refresh = keys.sign_refresh(user_id)?;
    repo::set_refresh_token(db, user_id, &refresh)
        .await
        .map_err(|e| ApiError::Internal(e.context("persist refresh token")))?;
    Ok((access, refresh))
}

/// Verify, compare with the stored token, then overwrite with a fresh
/// pair. Every failure mode collapses to the same `Unauthorized` so a
/// caller cannot tell expiry from reuse.
pub async fn rotate(
    db: &PgPool,
    keys: &JwtKeys,
    incoming: &str,
) -> Result<(String, String), ApiError> {
    const REJECT: &str = "Invalid or expired refresh token";

    let claims = keys
        .verify_refresh(incoming)
        .map_err(|_| ApiError::Unauthorized(REJECT.into()))?;

    let user = repo::find_by_id(db, claims.sub)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::Unauthorized(REJECT.into()))?;

    if !refresh_token_matches(user.refresh_token.as_deref(), incoming) {
        warn!(user_id = %user.id, "stale refresh token presented");
        return Err(ApiError::Unauthorized(REJECT.into()));
    }

    issue_pair(db, keys, user.id).await
}

pub async fn register(
    st: &AppState,
    fields: RegisterFields,
    files: RegisterFiles,
) -> Result<RegisterOutcome, ApiError> {
    let (Some(username), Some(email), Some(full_name), Some(password)) = (
        non_blank(&fields.username),
        non_blank(&fields.email),
        non_blank(&fields.full_name),
        non_blank(&fields.password),
    ) else {
        return Err(ApiError::BadRequest("All fields are required".into()));
    };
    if !is_valid_email(email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    let username = username.to_lowercase();

    if repo::find_by_username_or_email(&st.db, &username, email)
        .await
        .map_err(ApiError::Internal)?
        .is_some()
    {
        return Ok(RegisterOutcome::Duplicate);
    }

    let avatar_part = files
        .avatar
        .ok_or_else(|| ApiError::BadRequest("Avatar file is required".into()))?;
    let avatar = store_image(st, "avatars", &avatar_part)
        .await
        .map_err(|e| {
            warn!(error = %e, "avatar upload failed");
            ApiError::BadRequest("Avatar upload failed".into())
        })?;

    // Cover upload failure is non-fatal; the profile starts without one.
    let cover = match files.cover_image {
        Some(part) => match store_image(st, "covers", &part).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(error = %e, "cover image upload failed, continuing without");
                None
            }
        },
        None => None,
    };

    let created = repo::create(
        &st.db,
        NewUser {
            username: &username,
            email,
            full_name,
            password,
            avatar_url: &avatar.url,
            cover_image_url: cover.as_ref().map(|c| c.url.as_str()).unwrap_or(""),
        },
    )
    .await;

    let id = match created {
        Ok(id) => id,
        Err(e) => {
            // The row never landed, so the stored blobs would be orphans.
            discard_image(st, &avatar.key).await;
            if let Some(c) = &cover {
                discard_image(st, &c.key).await;
            }
            return Err(ApiError::Internal(e));
        }
    };

    let created = repo::find_public_by_id(&st.db, id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!("user {} missing right after insert", id))
        })?;

    info!(user_id = %created.id, username = %created.username, "user registered");
    Ok(RegisterOutcome::Created(created))
}

pub async fn login(
    st: &AppState,
    keys: &JwtKeys,
    req: &LoginRequest,
) -> Result<(PublicUser, String, String), ApiError> {
    let identifier = non_blank(&req.username)
        .or_else(|| non_blank(&req.email))
        .ok_or_else(|| ApiError::BadRequest("Username or email is required".into()))?;
    let password = non_blank(&req.password)
        .ok_or_else(|| ApiError::BadRequest("Password is required".into()))?;

    let user = repo::find_by_username_or_email(&st.db, &identifier.to_lowercase(), identifier)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Unauthorized("Invalid user credentials".into()));
    }

    let (access, refresh) = issue_pair(&st.db, keys, user.id).await?;
    let public = repo::find_public_by_id(&st.db, user.id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user {} vanished mid-login", user.id)))?;

    info!(user_id = %public.id, "user logged in");
    Ok((public, access, refresh))
}

pub async fn change_password(
    db: &PgPool,
    user_id: Uuid,
    old_password: &Option<String>,
    new_password: &Option<String>,
) -> Result<(), ApiError> {
    let (Some(old), Some(new)) = (non_blank(old_password), non_blank(new_password)) else {
        return Err(ApiError::BadRequest(
            "Old and new password are required".into(),
        ));
    };

    let user = repo::find_by_id(db, user_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))?;

    if !verify_password(old, &user.password_hash)? {
        return Err(ApiError::BadRequest("Invalid old password".into()));
    }

    repo::update_password(db, user_id, new)
        .await
        .map_err(ApiError::Internal)?;
    info!(user_id = %user_id, "password changed");
    Ok(())
}

pub async fn update_account(
    db: &PgPool,
    user_id: Uuid,
    full_name: &Option<String>,
    email: &Option<String>,
) -> Result<PublicUser, ApiError> {
    let (Some(full_name), Some(email)) = (non_blank(full_name), non_blank(email)) else {
        return Err(ApiError::BadRequest(
            "Full name and email are required".into(),
        ));
    };
    if !is_valid_email(email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }

    match repo::update_account(db, user_id, full_name, email).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ApiError::Unauthorized("Invalid access token".into())),
        Err(e) if is_unique_violation(&e) => {
            Err(ApiError::Conflict("Email is already in use".into()))
        }
        Err(e) => Err(ApiError::Internal(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_blank_trims_and_rejects_empty() {
        assert_eq!(non_blank(&Some("  ada  ".into())), Some("ada"));
        assert_eq!(non_blank(&Some("   ".into())), None);
        assert_eq!(non_blank(&Some(String::new())), None);
        assert_eq!(non_blank(&None), None);
    }

    #[test]
    fn refresh_match_requires_exact_equality() {
        assert!(refresh_token_matches(Some("tok-a"), "tok-a"));
        assert!(!refresh_token_matches(Some("tok-a"), "tok-b"));
        assert!(!refresh_token_matches(Some("tok-a"), "tok-a "));
    }

    #[test]
    fn absent_stored_token_never_matches() {
        // No active session means nothing can rotate.
        assert!(!refresh_token_matches(None, "tok-a"));
        assert!(!refresh_token_matches(None, ""));
    }
}
