//! # snapframe
//!
//! Capture one representative still frame from a video, reliably, even when
//! the decoder is slow, flaky, or lies about being ready.
//!
//! An extraction opens a decoder for the input, waits for metadata, then
//! walks a short list of fractional-duration *anchors* (start, 10 %, 30 %),
//! retrying each with bounded backoff until a picture is safe to capture.
//! The first capture-safe picture is encoded twice: a full-resolution
//! preview and a small, low-quality copy for a classification API. Every
//! extraction resolves exactly once, within a size-derived global budget,
//! and always releases its decoder.
//!
//! ## Quick Start
//!
//! ```no_run
//! use snapframe::{ExtractOptions, MediaInput};
//!
//! # async fn example() -> Result<(), snapframe::SnapError> {
//! let input = MediaInput::from_path("clip.mp4")?;
//! let result = snapframe::extract_frames(&input, &ExtractOptions::new()).await?;
//!
//! result.preview.save("clip.preview.jpg")?;
//! result.api.save("clip.api.jpg")?;
//! println!("captured at {:?} after {:?}", result.position, result.elapsed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom decoders
//!
//! [`extract_frames`] uses the bundled FFmpeg backend. Anything that
//! implements [`DecoderBackend`] can be driven instead through
//! [`extract_frames_with`]; the retry, timeout, and release guarantees are
//! the same.
//!
//! ## Errors
//!
//! All fallible operations return [`SnapError`]. The terminal capture
//! failures are [`SnapError::DecodeError`],
//! [`SnapError::DimensionUnavailable`],
//! [`SnapError::FrameCaptureExhausted`], [`SnapError::Timeout`], and
//! [`SnapError::RasterizationUnavailable`]; see
//! [`SnapError::is_terminal_capture_failure`].

pub mod configuration;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod input;
pub mod policy;
pub mod progress;
pub mod rasterizer;
pub mod session;

pub use configuration::{CaptureTuning, ExtractOptions, RasterOptions};
pub use controller::{CaptureAttempt, CaptureState, FallbackController};
pub use decoder::{DecoderBackend, DecoderSignal, DecoderState, Readiness, SignalReceiver};
pub use error::SnapError;
pub use extract::{ExtractionResult, extract_frames, extract_frames_with};
pub use ffmpeg::{FfmpegBackend, FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use input::{MediaInput, MediaSource};
pub use policy::CapturePolicy;
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo};
pub use rasterizer::{EncodedRaster, Rasterizer, Rasters, fit_within};
pub use session::DecoderSession;
