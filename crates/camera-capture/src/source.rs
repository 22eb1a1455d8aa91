//! Bundled frame sources

use crate::{CameraError, FrameSource, SourceKind, VideoFrame};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Recorded footage stored as a directory of still images, replayed in
/// file-name order. Finite: returns `Ok(None)` after the last image.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
    opened_at: Option<Instant>,
}

impl DirectorySource {
    /// Create a source over `dir` (not opened yet)
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            files: Vec::new(),
            cursor: 0,
            frame_interval: None,
            last_frame: None,
            opened_at: None,
        }
    }

    /// Pace playback at `fps` instead of reading as fast as possible
    pub fn with_fps(mut self, fps: u32) -> Self {
        if fps > 0 {
            self.frame_interval = Some(Duration::from_secs_f64(1.0 / fps as f64));
        }
        self
    }

    /// Number of frames discovered by [`open`](FrameSource::open)
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True before opening or for an empty directory
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

impl FrameSource for DirectorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.dir.display())
    }

    fn open(&mut self) -> Result<(), CameraError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| CameraError::Open(format!("{}: {}", self.dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        info!("Opened {} with {} frames", self.describe(), files.len());
        self.files = files;
        self.cursor = 0;
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let opened_at = self.opened_at.ok_or(CameraError::NotOpened)?;
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.pace();

        let img = image::open(&path)
            .map_err(|e| CameraError::Decode(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        let sequence = self.cursor as u32;
        self.cursor += 1;
        debug!("Decoded {} ({}x{})", path.display(), img.width(), img.height());

        Ok(Some(VideoFrame::from_image(
            img,
            opened_at.elapsed().as_nanos() as u64,
            sequence,
        )))
    }
}

/// In-memory frames, replayed once (file semantics) or forever
/// (stream semantics).
pub struct ReplaySource {
    name: String,
    frames: Vec<VideoFrame>,
    cursor: usize,
    looping: bool,
    frame_interval: Option<Duration>,
    opened: bool,
    sequence: u32,
}

impl ReplaySource {
    /// Play `frames` once
    pub fn once(name: impl Into<String>, frames: Vec<VideoFrame>) -> Self {
        Self {
            name: name.into(),
            frames,
            cursor: 0,
            looping: false,
            frame_interval: None,
            opened: false,
            sequence: 0,
        }
    }

    /// Play `frames` in a loop, behaving like a live stream
    pub fn looping(name: impl Into<String>, frames: Vec<VideoFrame>) -> Self {
        Self {
            looping: true,
            ..Self::once(name, frames)
        }
    }

    /// Sleep `interval` before each frame
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }
}

impl FrameSource for ReplaySource {
    fn kind(&self) -> SourceKind {
        if self.looping {
            SourceKind::Stream
        } else {
            SourceKind::File
        }
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.name)
    }

    fn open(&mut self) -> Result<(), CameraError> {
        if self.frames.is_empty() && self.looping {
            return Err(CameraError::Open(format!("{} has no frames", self.name)));
        }
        self.opened = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        if !self.opened {
            return Err(CameraError::NotOpened);
        }
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }

        let mut frame = self.frames[self.cursor].clone();
        frame.sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        self.cursor += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_directory_source_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("b.png", 200u8), ("a.png", 100u8)] {
            RgbImage::from_pixel(2, 2, Rgb([shade, 0, 0]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = DirectorySource::new(dir.path());
        assert_eq!(source.kind(), SourceKind::File);
        source.open().unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(0, 0), Some([100, 0, 0]));
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.get_pixel(0, 0), Some([200, 0, 0]));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_directory_source_missing_dir() {
        let mut source = DirectorySource::new("/definitely/not/here");
        assert!(matches!(source.open(), Err(CameraError::Open(_))));
        assert!(matches!(source.next_frame(), Err(CameraError::NotOpened)));
    }

    #[test]
    fn test_replay_once_is_finite() {
        let mut source = ReplaySource::once("cam", vec![VideoFrame::filled(1, 1, [0, 0, 0], 0); 2]);
        source.open().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_replay_looping_numbers_frames() {
        let mut source = ReplaySource::looping("cam", vec![VideoFrame::filled(1, 1, [0, 0, 0], 0)]);
        assert_eq!(source.kind(), SourceKind::Stream);
        source.open().unwrap();
        for expected in 0..5 {
            assert_eq!(source.next_frame().unwrap().unwrap().sequence, expected);
        }
    }
}
