//! Frame sources requested through the control API

use camera_capture::{CameraError, DirectorySource, FrameSource, ReplaySource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Video source description accepted by the start endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Recorded images read from disk once, in file-name order
    Directory {
        path: PathBuf,
        #[serde(default)]
        fps: Option<u32>,
    },
    /// Images loaded into memory and replayed; with `loop` the source acts
    /// like a live stream
    Replay {
        path: PathBuf,
        #[serde(default)]
        fps: Option<u32>,
        #[serde(default, rename = "loop")]
        looping: bool,
    },
    /// Live camera stream (RTSP or any URL OpenCV can open); reconnected
    /// with backoff when it drops
    Stream {
        url: String,
        #[serde(default)]
        stride: Option<u32>,
    },
    /// Recorded video file, analysed once
    Video {
        path: PathBuf,
        #[serde(default)]
        stride: Option<u32>,
    },
}

impl SourceSpec {
    /// URL or path, for logs and errors
    pub fn location(&self) -> String {
        match self {
            SourceSpec::Directory { path, .. } | SourceSpec::Replay { path, .. } | SourceSpec::Video { path, .. } => {
                path.display().to_string()
            }
            SourceSpec::Stream { url, .. } => url.clone(),
        }
    }

    /// Build the source. Replay sources read every image up front, so call
    /// this off the async executor.
    pub fn build(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        match self {
            SourceSpec::Directory { path, fps } => {
                let source = DirectorySource::new(path);
                Ok(Box::new(match fps {
                    Some(fps) => source.with_fps(*fps),
                    None => source,
                }))
            }
            SourceSpec::Replay { path, fps, looping } => {
                let mut reader = DirectorySource::new(path);
                reader.open()?;
                let mut frames = Vec::with_capacity(reader.len());
                while let Some(frame) = reader.next_frame()? {
                    frames.push(frame);
                }
                if frames.is_empty() {
                    return Err(CameraError::Open(format!("{} contains no images", path.display())));
                }
                info!("Loaded {} replay frame(s) from {}", frames.len(), path.display());

                let name = path.display().to_string();
                let mut source = if *looping {
                    ReplaySource::looping(name, frames)
                } else {
                    ReplaySource::once(name, frames)
                };
                if let Some(fps) = fps.filter(|fps| *fps > 0) {
                    source = source.with_interval(Duration::from_secs_f64(1.0 / fps as f64));
                }
                Ok(Box::new(source))
            }
            SourceSpec::Stream { url, stride } => video_capture(VideoInput::Stream(url), *stride),
            SourceSpec::Video { path, stride } => video_capture(VideoInput::File(path), *stride),
        }
    }
}

enum VideoInput<'a> {
    Stream(&'a str),
    File(&'a Path),
}

#[cfg(feature = "video")]
fn video_capture(input: VideoInput<'_>, stride: Option<u32>) -> Result<Box<dyn FrameSource>, CameraError> {
    use camera_capture::VideoCaptureSource;

    let source = match input {
        VideoInput::Stream(url) => VideoCaptureSource::stream(url),
        VideoInput::File(path) => VideoCaptureSource::file(path),
    };
    Ok(Box::new(source.with_stride(stride.unwrap_or(1))))
}

#[cfg(not(feature = "video"))]
fn video_capture(input: VideoInput<'_>, _stride: Option<u32>) -> Result<Box<dyn FrameSource>, CameraError> {
    let location = match input {
        VideoInput::Stream(url) => url.to_string(),
        VideoInput::File(path) => path.display().to_string(),
    };
    Err(CameraError::Open(format!(
        "{}: built without video capture support (enable the `video` feature)",
        location
    )))
}
