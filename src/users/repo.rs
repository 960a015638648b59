use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::services::hash_password;
use crate::users::dto::{ChannelProfile, PublicUser, WatchHistoryRow};

/// Full user row. Deliberately not `Serialize`: the credential columns
/// must never reach a response body, so sanitized reads go through
/// [`PublicUser`] projections instead.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: String,
    pub refresh_token: Option<String>,
    pub created_at: OffsetDateTime,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
    pub password: &'a str,
    pub avatar_url: &'a str,
    pub cover_image_url: &'a str,
}

const USER_COLUMNS: &str =
    "id, username, email, full_name, password_hash, avatar_url, cover_image_url, refresh_token, created_at";

const PUBLIC_COLUMNS: &str =
    "id, username, email, full_name, avatar_url AS avatar, cover_image_url AS cover_image, created_at";

/// Create a user. The plaintext password is hashed here, at the write
/// boundary, and is never read back.
pub async fn create(db: &PgPool, new: NewUser<'_>) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(new.password)?;
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (username, email, full_name, password_hash, avatar_url, cover_image_url)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(new.username)
    .bind(new.email)
    .bind(new.full_name)
    .bind(&password_hash)
    .bind(new.avatar_url)
    .bind(new.cover_image_url)
    .fetch_one(db)
    .await?;
    Ok(id)
}

/// Match on either identifier; callers pass the same value twice when
/// they only hold one.
pub async fn find_by_username_or_email(
    db: &PgPool,
    username: &str,
    email: &str,
) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2"
    ))
    .bind(username)
    .bind(email)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn find_public_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<PublicUser>> {
    let user = sqlx::query_as::<_, PublicUser>(&format!(
        "SELECT {PUBLIC_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

/// Trusted-path single-column write; unrelated fields are untouched.
pub async fn set_refresh_token(db: &PgPool, id: Uuid, token: &str) -> anyhow::Result<()> {
    let result = sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
        .bind(id)
        .bind(token)
        .execute(db)
        .await?;
    anyhow::ensure!(result.rows_affected() == 1, "refresh token not persisted");
    Ok(())
}

/// Unsets the stored refresh token. A no-op when it is already unset,
/// which keeps logout idempotent.
pub async fn clear_refresh_token(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
    sqlx::query("UPDATE users SET refresh_token = NULL WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn update_password(db: &PgPool, id: Uuid, new_password: &str) -> anyhow::Result<()> {
    let password_hash = hash_password(new_password)?;
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(id)
        .bind(&password_hash)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn update_account(
    db: &PgPool,
    id: Uuid,
    full_name: &str,
    email: &str,
) -> anyhow::Result<Option<PublicUser>> {
    let user = sqlx::query_as::<_, PublicUser>(&format!(
        "UPDATE users SET full_name = $2, email = $3 WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
    ))
    .bind(id)
    .bind(full_name)
    .bind(email)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn set_avatar(db: &PgPool, id: Uuid, url: &str) -> anyhow::Result<Option<PublicUser>> {
    let user = sqlx::query_as::<_, PublicUser>(&format!(
        "UPDATE users SET avatar_url = $2 WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
    ))
    .bind(id)
    .bind(url)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn set_cover_image(
    db: &PgPool,
    id: Uuid,
    url: &str,
) -> anyhow::Result<Option<PublicUser>> {
    let user = sqlx::query_as::<_, PublicUser>(&format!(
        "UPDATE users SET cover_image_url = $2 WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
    ))
    .bind(id)
    .bind(url)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

/// Channel view: lowercased-handle match, subscriber edges counted both
/// directions, caller membership derived in the same statement.
pub async fn channel_profile(
    db: &PgPool,
    username: &str,
    caller: Uuid,
) -> anyhow::Result<Option<ChannelProfile>> {
    let profile = sqlx::query_as::<_, ChannelProfile>(
        r#"
        SELECT u.full_name,
               u.username,
               u.email,
               u.avatar_url AS avatar,
               u.cover_image_url AS cover_image,
               (SELECT count(*) FROM subscriptions s WHERE s.channel = u.id)
                   AS subscribers_count,
               (SELECT count(*) FROM subscriptions s WHERE s.subscriber = u.id)
                   AS channels_subscribed_to_count,
               EXISTS(SELECT 1 FROM subscriptions s
                      WHERE s.channel = u.id AND s.subscriber = $2)
                   AS is_subscribed
        FROM users u
        WHERE u.username = $1
        "#,
    )
    .bind(username)
    .bind(caller)
    .fetch_optional(db)
    .await?;
    Ok(profile)
}

/// Watch history in stored insertion order, repeats included. The owner
/// join is LEFT so a vanished owner yields NULL columns, not an error.
pub async fn watch_history(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<WatchHistoryRow>> {
    let rows = sqlx::query_as::<_, WatchHistoryRow>(
        r#"
        SELECT v.id AS video_id,
               v.title,
               v.thumbnail_url AS thumbnail,
               v.duration_seconds,
               v.created_at,
               o.full_name AS owner_full_name,
               o.username AS owner_username,
               o.avatar_url AS owner_avatar
        FROM watch_history h
        JOIN videos v ON v.id = h.video_id
        LEFT JOIN users o ON o.id = v.owner_id
        WHERE h.user_id = $1
        ORDER BY h.position
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}
