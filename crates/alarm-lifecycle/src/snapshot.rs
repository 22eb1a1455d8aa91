//! Snapshot persistence

use crate::SnapshotError;
use alarm_tracker::CameraId;
use async_trait::async_trait;
use camera_capture::VideoFrame;
use chrono::Utc;
use image::ImageFormat;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Stores an annotated alarm image and returns a URL operators can open
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn upload(&self, image: &VideoFrame, camera_id: CameraId) -> Result<String, SnapshotError>;
}

/// Writes JPEG snapshots into a directory served under `base_url`
pub struct FileSnapshotStore {
    dir: PathBuf,
    base_url: String,
}

impl FileSnapshotStore {
    /// Create the store, creating `dir` if it does not exist
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_name(camera_id: CameraId) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}.jpg",
            camera_id,
            Utc::now().format("%Y%m%d_%H%M%S"),
            &id[..8]
        )
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn upload(&self, image: &VideoFrame, camera_id: CameraId) -> Result<String, SnapshotError> {
        let rgb = image.to_image().ok_or(SnapshotError::InvalidImage {
            width: image.width,
            height: image.height,
            len: image.data.len(),
        })?;

        let name = Self::object_name(camera_id);
        let path = self.dir.join(&name);

        // JPEG encoding and the file write are blocking
        let written = path.clone();
        tokio::task::spawn_blocking(move || rgb.save_with_format(&written, ImageFormat::Jpeg))
            .await
            .map_err(|e| SnapshotError::Io(e.to_string()))?
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;

        debug!("Saved snapshot {}", path.display());
        Ok(format!("{}/{}", self.base_url, name))
    }
}
