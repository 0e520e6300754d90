//! Public extraction entry points.

use std::time::Duration;

use crate::{
    configuration::ExtractOptions,
    controller::FallbackController,
    decoder::DecoderBackend,
    error::SnapError,
    ffmpeg::FfmpegBackend,
    input::MediaInput,
    rasterizer::EncodedRaster,
};

/// The outcome of a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Full-resolution preview raster.
    pub preview: EncodedRaster,
    /// Downsized raster for the classification API.
    pub api: EncodedRaster,
    /// Index of the anchor the frame came from. `None` when the frame was
    /// taken at the decoder's current position without a seek.
    pub anchor: Option<usize>,
    /// Playback position of the captured frame.
    pub position: Duration,
    /// Time from open to resolution.
    pub elapsed: Duration,
}

/// Extract a representative frame from `input` with the FFmpeg backend.
///
/// # Errors
///
/// Returns one of the terminal capture failures
/// ([`SnapError::is_terminal_capture_failure`]), or
/// [`SnapError::Cancelled`], [`SnapError::FileOpen`], or
/// [`SnapError::UnsupportedInput`] for problems outside the state machine.
///
/// # Example
///
/// ```no_run
/// use snapframe::{ExtractOptions, MediaInput};
///
/// # async fn example() -> Result<(), snapframe::SnapError> {
/// let input = MediaInput::from_path("holiday.mov")?;
/// let result = snapframe::extract_frames(&input, &ExtractOptions::new()).await?;
/// result.preview.save("holiday.preview.jpg")?;
/// result.api.save("holiday.api.jpg")?;
/// # Ok(())
/// # }
/// ```
pub async fn extract_frames(
    input: &MediaInput,
    options: &ExtractOptions,
) -> Result<ExtractionResult, SnapError> {
    extract_frames_with(input, FfmpegBackend::new(), options).await
}

/// Extract a representative frame from `input` using `backend`.
///
/// Every path out of this function, including timeout and cancellation,
/// releases `backend` exactly once.
///
/// # Errors
///
/// See [`extract_frames`].
pub async fn extract_frames_with<B: DecoderBackend>(
    input: &MediaInput,
    mut backend: B,
    options: &ExtractOptions,
) -> Result<ExtractionResult, SnapError> {
    if !input.is_video() {
        backend.release();
        return Err(SnapError::UnsupportedInput(format!(
            "expected a video, got {}",
            input.mime_type()
        )));
    }
    if options.is_cancelled() {
        backend.release();
        return Err(SnapError::Cancelled);
    }

    log::debug!(
        "Extracting frames from {} ({:.1} MB, {})",
        input.name().unwrap_or("in-memory input"),
        input.size_in_megabytes(),
        input.mime_type()
    );
    let mut controller = FallbackController::open(input, backend, options)?;
    controller.drive().await
}
