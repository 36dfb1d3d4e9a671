//! Photo persistence on local disk

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use pv_core::verification::{PhotoAngle, PhotoRef};
use pv_core::{EngineError, EngineResult, PhotoStore};

/// Writes image bytes under `{root}/{verification_id}/` and hands back a
/// `file://` reference. Object storage slots in behind the same trait.
pub struct DiskPhotoStore {
    root: PathBuf,
}

impl DiskPhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::Upstream {
        service: "photo-storage",
        detail: e.to_string(),
    }
}

#[async_trait]
impl PhotoStore for DiskPhotoStore {
    async fn store_photo(
        &self,
        verification_id: Uuid,
        angle: PhotoAngle,
        bytes: &[u8],
    ) -> EngineResult<PhotoRef> {
        let dir = self.root.join(verification_id.to_string());
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        let path = dir.join(format!("{angle}_{}.jpg", Uuid::new_v4()));
        tokio::fs::write(&path, bytes).await.map_err(io_err)?;

        tracing::debug!(%verification_id, %angle, path = %path.display(), "stored photo");
        Ok(PhotoRef {
            url: format!("file://{}", path.display()),
        })
    }
}
