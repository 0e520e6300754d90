//! Error types for the `snapframe` crate.
//!
//! This module defines [`SnapError`], the single discriminated result type
//! returned by every fallible operation. The first five variants are the
//! terminal capture failures an extraction can end in; the rest cover the
//! plumbing around it (file access, FFmpeg, image encoding, cancellation).

use std::{io::Error as IoError, path::PathBuf, time::Duration};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

use crate::controller::CaptureState;

/// The unified error type for all `snapframe` operations.
///
/// Capture failures are terminal: the extraction never retries across
/// requests on its own. Callers decide whether to resubmit a file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapError {
    /// The decoder reported an error. No further anchors are attempted.
    #[error("Failed to decode video: {0}")]
    DecodeError(String),

    /// The decoder never reported non-zero frame dimensions.
    #[error("Video dimensions not available after {retries} retries")]
    DimensionUnavailable {
        /// Number of dimension retries performed before giving up.
        retries: u32,
    },

    /// Every anchor exhausted its settle retries and the last-resort
    /// capture at the current position was not possible.
    #[error("Video frame capture failed after {anchors} anchor attempts")]
    FrameCaptureExhausted {
        /// Number of anchors that were attempted.
        anchors: usize,
    },

    /// The global capture budget elapsed before any frame was captured.
    #[error("Video frame capture timed out after {0:?}")]
    Timeout(Duration),

    /// The rendering surface for a raster could not be created.
    #[error("Rasterization unavailable: {0}")]
    RasterizationUnavailable(String),

    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path of the file (or its temporary spill).
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The input is not something the extractor can handle.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// A controller was driven again after it had already resolved.
    #[error("Capture already resolved as {0:?}")]
    AlreadyResolved(CaptureState),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while encoding a raster.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl SnapError {
    /// Returns `true` for the failures that end a capture state machine
    /// (decode, dimensions, anchor exhaustion, timeout, rasterization).
    pub fn is_terminal_capture_failure(&self) -> bool {
        matches!(
            self,
            SnapError::DecodeError(_)
                | SnapError::DimensionUnavailable { .. }
                | SnapError::FrameCaptureExhausted { .. }
                | SnapError::Timeout(_)
                | SnapError::RasterizationUnavailable(_)
        )
    }

    /// Short, stable label for machine-readable output.
    pub fn kind(&self) -> &'static str {
        match self {
            SnapError::DecodeError(_) => "decode",
            SnapError::DimensionUnavailable { .. } => "dimension_unavailable",
            SnapError::FrameCaptureExhausted { .. } => "frame_capture_exhausted",
            SnapError::Timeout(_) => "timeout",
            SnapError::RasterizationUnavailable(_) => "rasterization_unavailable",
            SnapError::FileOpen { .. } => "file_open",
            SnapError::UnsupportedInput(_) => "unsupported_input",
            SnapError::AlreadyResolved(_) => "already_resolved",
            SnapError::Cancelled => "cancelled",
            SnapError::FfmpegError(_) => "ffmpeg",
            SnapError::IoError(_) => "io",
            SnapError::ImageError(_) => "image",
        }
    }
}

impl From<FfmpegError> for SnapError {
    fn from(error: FfmpegError) -> Self {
        SnapError::FfmpegError(error.to_string())
    }
}
