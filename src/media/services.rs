use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

/// One uploaded file from a named multipart field.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub body: Bytes,
    pub content_type: String,
}

/// Scratch file holding an upload before the store call. Removing it is
/// guaranteed on every exit path through `Drop`.
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub async fn spool(dir: &str, ext: &str, body: &Bytes) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create scratch dir {}", dir))?;
        let path = Path::new(dir).join(format!("{}.{}", Uuid::new_v4(), ext));
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("spool upload to {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "scratch file not removed");
            }
        }
    }
}

/// Store-blob collaborator contract: take a local file, return its public
/// URL. Any non-URL outcome is one uniform failure.
pub async fn upload_local_file(
    st: &AppState,
    local_path: &Path,
    key: &str,
    content_type: &str,
) -> anyhow::Result<String> {
    let body = tokio::fs::read(local_path)
        .await
        .with_context(|| format!("read upload {}", local_path.display()))?;
    st.storage
        .put_object(key, Bytes::from(body), content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(st.storage.public_url(key))
}

/// A blob that made it to the media store.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub key: String,
    pub url: String,
}

/// Spool a multipart file and push it to the media store under
/// `{prefix}/{uuid}.{ext}`. The scratch copy is gone by the time this
/// returns, success or not.
pub async fn store_image(
    st: &AppState,
    prefix: &str,
    part: &FilePart,
) -> anyhow::Result<StoredImage> {
    let ext = ext_from_mime(&part.content_type).unwrap_or("bin");
    let scratch = ScratchFile::spool(&st.config.media.scratch_dir, ext, &part.body).await?;
    let key = format!("{}/{}.{}", prefix, Uuid::new_v4(), ext);
    let url = upload_local_file(st, scratch.path(), &key, &part.content_type).await?;
    Ok(StoredImage { key, url })
}

/// Best-effort removal of an already-stored blob, used when the write
/// that should have referenced it fails.
pub async fn discard_image(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(key = %key, error = %e, "stored image not discarded");
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn scratch_file_is_removed_on_drop() {
        let state = AppState::fake();
        let body = Bytes::from_static(b"fake image bytes");
        let scratch = ScratchFile::spool(&state.config.media.scratch_dir, "jpg", &body)
            .await
            .unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.exists());
        drop(scratch);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn store_image_returns_public_url_and_cleans_up() {
        let state = AppState::fake();
        let part = FilePart {
            body: Bytes::from_static(b"png bytes"),
            content_type: "image/png".into(),
        };
        let stored = store_image(&state, "avatars", &part).await.unwrap();
        assert!(stored.url.starts_with("https://fake.local/avatars/"));
        assert!(stored.url.ends_with(".png"));
        assert!(stored.url.ends_with(&stored.key));

        // Nothing left behind in the scratch dir.
        let mut entries = tokio::fs::read_dir(&state.config.media.scratch_dir)
            .await
            .unwrap();
        let mut leftover = 0;
        while let Some(e) = entries.next_entry().await.unwrap() {
            if e.path().extension().map(|x| x == "png").unwrap_or(false) {
                leftover += 1;
            }
        }
        assert_eq!(leftover, 0);
    }
}
