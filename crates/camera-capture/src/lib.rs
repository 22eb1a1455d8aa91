//! Camera Capture Library for Site Safety Analysis
//!
//! Provides the frame sources analysis workers pull from:
//! - Live network streams (retried with backoff when they drop)
//! - Recorded footage (finite; end-of-stream stops the worker)
//!
//! With the `video` feature, [`VideoCaptureSource`] decodes RTSP streams
//! and video files through OpenCV. Without it only still-image sources are
//! available.

pub mod frame;
pub mod source;
#[cfg(feature = "video")]
pub mod video;

pub use frame::VideoFrame;
pub use source::{DirectorySource, ReplaySource};
#[cfg(feature = "video")]
pub use video::VideoCaptureSource;

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open source: {0}")]
    Open(String),

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("Source not opened")]
    NotOpened,
}

/// How a source behaves when it runs dry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Network stream: read failures are transient and retried
    Stream,
    /// Recorded file(s): end-of-stream is terminal
    File,
}

/// A pull-based source of video frames.
///
/// Implementations block in [`next_frame`](FrameSource::next_frame) for at
/// most one frame interval. `Ok(None)` means the source is exhausted.
pub trait FrameSource: Send {
    /// Stream or file semantics
    fn kind(&self) -> SourceKind;

    /// Human readable description for logs (URL, path)
    fn describe(&self) -> String;

    /// Open the underlying device/stream. Called again after a stream failure.
    fn open(&mut self) -> Result<(), CameraError>;

    /// Read the next frame
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<(), CameraError> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        (**self).next_frame()
    }
}
