use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Base under which stored objects are publicly reachable.
    pub public_base_url: String,
    /// Directory multipart uploads are spooled to before the store call.
    pub scratch_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            access_secret: std::env::var("JWT_ACCESS_SECRET")?,
            refresh_secret: std::env::var("JWT_REFRESH_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "vidstream".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "vidstream-users".into()),
            access_ttl_minutes: std::env::var("JWT_ACCESS_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 10),
        };
        let endpoint = std::env::var("MEDIA_ENDPOINT")?;
        let bucket = std::env::var("MEDIA_BUCKET")?;
        let media = MediaConfig {
            public_base_url: std::env::var("MEDIA_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("{}/{}", endpoint, bucket)),
            access_key: std::env::var("MEDIA_ACCESS_KEY")?,
            secret_key: std::env::var("MEDIA_SECRET_KEY")?,
            scratch_dir: std::env::var("MEDIA_SCRATCH_DIR")
                .unwrap_or_else(|_| "/tmp/vidstream-uploads".into()),
            endpoint,
            bucket,
        };
        Ok(Self {
            database_url,
            jwt,
            media,
        })
    }
}
