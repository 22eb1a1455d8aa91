//! OpenCV capture of network streams and video files

use crate::{CameraError, FrameSource, SourceKind, VideoFrame};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Frames decoded by OpenCV from an RTSP/HTTP URL (stream semantics) or a
/// video file (file semantics).
pub struct VideoCaptureSource {
    location: String,
    kind: SourceKind,
    stride: u32,
    capture: Option<VideoCapture>,
    opened_at: Option<Instant>,
    sequence: u32,
}

impl VideoCaptureSource {
    /// Live stream, e.g. `rtsp://10.0.0.7:554/ch1`
    pub fn stream(url: impl Into<String>) -> Self {
        Self::new(url.into(), SourceKind::Stream)
    }

    /// Recorded video file, read once
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::new(path.as_ref().display().to_string(), SourceKind::File)
    }

    fn new(location: String, kind: SourceKind) -> Self {
        Self {
            location,
            kind,
            stride: 1,
            capture: None,
            opened_at: None,
            sequence: 0,
        }
    }

    /// Decode only every `stride`th frame; the others are grabbed and
    /// discarded without conversion
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride.max(1);
        self
    }

    fn open_error(&self, reason: impl std::fmt::Display) -> CameraError {
        CameraError::Open(format!("{}: {}", self.location, reason))
    }
}

fn stream_error(e: opencv::Error) -> CameraError {
    CameraError::Stream(e.to_string())
}

fn decode_error(e: opencv::Error) -> CameraError {
    CameraError::Decode(e.to_string())
}

impl FrameSource for VideoCaptureSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        self.location.clone()
    }

    fn open(&mut self) -> Result<(), CameraError> {
        // Reconnects replace the old handle
        self.capture = None;

        let capture = VideoCapture::from_file(&self.location, videoio::CAP_ANY).map_err(|e| self.open_error(e))?;
        if !capture.is_opened().map_err(|e| self.open_error(e))? {
            return Err(self.open_error("capture did not open"));
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        let fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        info!(
            "Opened {} ({}x{} @ {:.1} fps, stride {})",
            self.location, width, height, fps, self.stride
        );

        self.capture = Some(capture);
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let opened_at = self.opened_at.ok_or(CameraError::NotOpened)?;
        let capture = self.capture.as_mut().ok_or(CameraError::NotOpened)?;

        for _ in 1..self.stride {
            if !capture.grab().map_err(stream_error)? {
                return Ok(None);
            }
        }

        let mut bgr = Mat::default();
        if !capture.read(&mut bgr).map_err(stream_error)? || bgr.empty() {
            debug!("{} returned no frame", self.location);
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(decode_error)?;
        let data = rgb.data_bytes().map_err(decode_error)?.to_vec();

        let frame = VideoFrame::new(
            data,
            rgb.cols() as u32,
            rgb.rows() as u32,
            opened_at.elapsed().as_nanos() as u64,
            self.sequence,
        );
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_constructor() {
        let stream = VideoCaptureSource::stream("rtsp://10.0.0.7/ch1").with_stride(3);
        assert_eq!(stream.kind(), SourceKind::Stream);
        assert_eq!(stream.stride, 3);
        assert_eq!(stream.describe(), "rtsp://10.0.0.7/ch1");

        let file = VideoCaptureSource::file("/data/site.mp4").with_stride(0);
        assert_eq!(file.kind(), SourceKind::File);
        assert_eq!(file.stride, 1);
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let mut source = VideoCaptureSource::file("/definitely/not/here.mp4");
        assert!(matches!(source.next_frame(), Err(CameraError::NotOpened)));
        assert!(matches!(source.open(), Err(CameraError::Open(_))));
    }
}
