//! Decoder backend contract.
//!
//! A [`DecoderBackend`] is the native decode resource behind a
//! [`DecoderSession`](crate::DecoderSession). It loads asynchronously,
//! reports readiness through [`DecoderSignal`]s, and answers non-blocking
//! [`snapshot`](DecoderBackend::snapshot) queries. The crate ships an
//! FFmpeg implementation ([`FfmpegBackend`](crate::FfmpegBackend)); tests
//! and embedders can supply their own.

use std::time::Duration;

use image::DynamicImage;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

use crate::{error::SnapError, input::MediaInput};

/// How far the decoder has progressed for the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Readiness {
    /// Nothing known yet.
    #[default]
    None,
    /// Container metadata (duration, dimensions) is known.
    Metadata,
    /// A picture for the current position has been decoded.
    DataDecoded,
}

/// Point-in-time view of a decoder.
///
/// `width`/`height > 0` is necessary but not sufficient for capture: a
/// settle delay after seeking is still required to avoid transiently
/// black frames.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecoderState {
    /// Readiness for the current position.
    pub readiness: Readiness,
    /// Decoded frame width in pixels, `0` while unknown.
    pub width: u32,
    /// Decoded frame height in pixels, `0` while unknown.
    pub height: u32,
    /// Duration in seconds, `None` while unknown. May be NaN or zero for
    /// streams that do not declare one.
    pub duration: Option<f64>,
    /// Current playback position.
    pub position: Duration,
    /// Terminal error reported by the decoder, if any.
    pub last_error: Option<String>,
}

impl DecoderState {
    /// Both dimensions are non-zero.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// The duration is known, finite, and positive.
    pub fn has_valid_duration(&self) -> bool {
        self.duration
            .is_some_and(|seconds| seconds.is_finite() && seconds > 0.0)
    }

    /// Data for the current position is decoded and has dimensions.
    pub fn is_capture_ready(&self) -> bool {
        self.readiness >= Readiness::DataDecoded && self.has_dimensions()
    }
}

/// Asynchronous notifications from a decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderSignal {
    /// Container metadata became available.
    MetadataLoaded,
    /// The first picture was decoded.
    DataLoaded,
    /// Enough data is buffered to start playback.
    CanPlay,
    /// Playback could run to the end without stalling.
    CanPlayThrough,
    /// A requested seek completed.
    Seeked,
    /// The decoder failed. Terminal.
    Error(String),
}

/// Receiving side of a backend's signal channel.
pub type SignalReceiver = UnboundedReceiver<DecoderSignal>;

/// A native decode resource for a single input.
///
/// Implementations must not block in any method: heavy work belongs on a
/// background thread that reports back through the signal channel.
pub trait DecoderBackend: Send {
    /// Begin loading `input` and return the channel on which signals will
    /// arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if loading cannot even be started.
    fn open(&mut self, input: &MediaInput) -> Result<SignalReceiver, SnapError>;

    /// Current readiness, dimensions, duration, and error.
    fn snapshot(&self) -> DecoderState;

    /// Request a move to `position`. Completion is signalled with
    /// [`DecoderSignal::Seeked`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected outright.
    fn seek(&mut self, position: Duration) -> Result<(), SnapError>;

    /// The decoded picture at the current position, at native resolution.
    ///
    /// # Errors
    ///
    /// Returns [`SnapError::RasterizationUnavailable`] when no picture can
    /// be produced.
    fn frame(&self) -> Result<DynamicImage, SnapError>;

    /// Optional frame-presentation capability.
    ///
    /// Backends that know when a decoded picture is actually presented
    /// return a receiver that resolves at that moment. The default reports
    /// the capability as absent.
    fn request_frame_presentation(&mut self) -> Option<oneshot::Receiver<()>> {
        None
    }

    /// Release the decode resource and any temporary artefacts.
    ///
    /// Called exactly once by [`DecoderSession`](crate::DecoderSession).
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_is_ordered() {
        assert!(Readiness::None < Readiness::Metadata);
        assert!(Readiness::Metadata < Readiness::DataDecoded);
    }

    #[test]
    fn dimensions_alone_are_not_capture_ready() {
        let state = DecoderState {
            readiness: Readiness::Metadata,
            width: 1920,
            height: 1080,
            ..DecoderState::default()
        };
        assert!(state.has_dimensions());
        assert!(!state.is_capture_ready());
    }

    #[test]
    fn duration_validity() {
        let mut state = DecoderState::default();
        assert!(!state.has_valid_duration());
        state.duration = Some(f64::NAN);
        assert!(!state.has_valid_duration());
        state.duration = Some(0.0);
        assert!(!state.has_valid_duration());
        state.duration = Some(f64::INFINITY);
        assert!(!state.has_valid_duration());
        state.duration = Some(12.5);
        assert!(state.has_valid_duration());
    }
}
