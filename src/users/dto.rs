use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Sanitized user projection returned to clients. The password hash and
/// refresh token are never part of this type.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Login accepts either identifier; both may be given.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

/// Body returned by login: the user plus both tokens (tokens are also set
/// as cookies).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Body returned by refresh: the rotated pair.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairData {
    pub access_token: String,
    pub refresh_token: String,
}

/// Public channel view with derived subscription fields. Fixed allowlist,
/// nothing else from the user row.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub avatar: String,
    pub cover_image: String,
    pub subscribers_count: i64,
    pub channels_subscribed_to_count: i64,
    pub is_subscribed: bool,
}

/// Flat row from the history join; owner columns are NULL when the video
/// owner no longer exists.
#[derive(Debug, Clone, FromRow)]
pub struct WatchHistoryRow {
    pub video_id: Uuid,
    pub title: String,
    pub thumbnail: String,
    pub duration_seconds: i32,
    pub created_at: OffsetDateTime,
    pub owner_full_name: Option<String>,
    pub owner_username: Option<String>,
    pub owner_avatar: Option<String>,
}

/// Owner projection inside a watch-history entry: name, handle and avatar
/// only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOwner {
    pub full_name: String,
    pub username: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryItem {
    pub video_id: Uuid,
    pub title: String,
    pub thumbnail: String,
    pub duration_seconds: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub owner: Option<WatchOwner>,
}

impl From<WatchHistoryRow> for WatchHistoryItem {
    fn from(r: WatchHistoryRow) -> Self {
        // All three owner columns come from the same joined row, so one
        // present column implies the others.
        let owner = match (r.owner_full_name, r.owner_username, r.owner_avatar) {
            (Some(full_name), Some(username), Some(avatar)) => Some(WatchOwner {
                full_name,
                username,
                avatar,
            }),
            _ => None,
        };
        Self {
            video_id: r.video_id,
            title: r.title,
            thumbnail: r.thumbnail,
            duration_seconds: r.duration_seconds,
            created_at: r.created_at,
            owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(owner: bool) -> WatchHistoryRow {
        WatchHistoryRow {
            video_id: Uuid::new_v4(),
            title: "a video".into(),
            thumbnail: "https://cdn.local/t.jpg".into(),
            duration_seconds: 90,
            created_at: OffsetDateTime::now_utc(),
            owner_full_name: owner.then(|| "Ada L".to_string()),
            owner_username: owner.then(|| "ada".to_string()),
            owner_avatar: owner.then(|| "https://cdn.local/a.jpg".to_string()),
        }
    }

    #[test]
    fn missing_owner_collapses_to_none() {
        let item = WatchHistoryItem::from(row(false));
        assert!(item.owner.is_none());
    }

    #[test]
    fn owner_projection_contains_only_allowlisted_fields() {
        let value = serde_json::to_value(WatchHistoryItem::from(row(true))).unwrap();
        let owner = value["owner"].as_object().unwrap();
        let mut keys: Vec<_> = owner.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["avatar", "fullName", "username"]);
    }

    #[test]
    fn public_user_never_serializes_credentials() {
        let user = PublicUser {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: "a@x.com".into(),
            full_name: "Ada L".into(),
            avatar: "https://cdn.local/a.jpg".into(),
            cover_image: String::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.to_lowercase().contains("password"));
        assert!(!json.contains("refreshToken"));
    }
}
