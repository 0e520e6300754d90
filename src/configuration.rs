//! Extraction configuration.
//!
//! [`ExtractOptions`] is a builder that threads progress callbacks,
//! cancellation tokens, retry tuning, and raster settings through
//! [`extract_frames`](crate::extract_frames) without polluting its
//! signature.
//!
//! The retry and settle constants in [`CaptureTuning`] are empirical
//! tolerances against flaky decoders. They are defaults, not physical
//! limits, and can be overridden per extraction.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use snapframe::{CancellationToken, ExtractOptions, ProgressCallback, ProgressInfo};
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?} after {:?}", info.stage, info.elapsed);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = ExtractOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_cancellation(token.clone())
//!     .with_timeout_budget(Duration::from_secs(30));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::policy::DEFAULT_ANCHORS;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Retry, backoff, and settle parameters for the capture state machine.
///
/// Fields with a `_large` twin apply to inputs above
/// [`large_input_threshold_megabytes`](CaptureTuning::large_input_threshold_megabytes).
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTuning {
    /// Global budget before any size adjustment.
    pub timeout_base: Duration,
    /// Budget added per megabyte of input.
    pub timeout_per_megabyte: Duration,
    /// Upper bound on the global budget.
    pub timeout_ceiling: Duration,
    /// Inputs strictly larger than this many megabytes use the `_large` values.
    pub large_input_threshold_megabytes: f64,
    /// Fractions of the duration to try, in order. Always three.
    pub anchors: [f64; 3],
    /// Maximum dimension retries before [`SnapError::DimensionUnavailable`](crate::SnapError::DimensionUnavailable).
    pub dimension_retry_limit: u32,
    /// Linear backoff step for dimension retries.
    pub dimension_base_delay: Duration,
    /// Linear backoff step for dimension retries on large inputs.
    pub dimension_base_delay_large: Duration,
    /// Cap on a single dimension retry delay.
    pub dimension_delay_cap: Duration,
    /// Wait after a seek completes before the first readiness poll.
    pub seek_settle: Duration,
    /// Post-seek settle on large inputs.
    pub seek_settle_large: Duration,
    /// Readiness polls per anchor before escalating.
    pub seek_poll_limit: u32,
    /// Readiness polls per anchor on large inputs.
    pub seek_poll_limit_large: u32,
    /// Spacing between readiness polls.
    pub seek_poll_interval: Duration,
    /// Poll spacing on large inputs.
    pub seek_poll_interval_large: Duration,
    /// Settle applied before rasterizing when the decoder cannot signal frame presentation.
    pub render_settle: Duration,
    /// Settle applied after a frame-presentation signal.
    pub presented_frame_settle: Duration,
    /// Settle before capturing at the current position without seeking.
    pub fast_path_settle: Duration,
    /// Pause before moving on to the next anchor.
    pub anchor_escalation_delay: Duration,
    /// Pause before the next anchor on large inputs.
    pub anchor_escalation_delay_large: Duration,
    /// Poll spacing while dimensions are known but no data is decoded yet.
    pub readiness_poll: Duration,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            timeout_base: Duration::from_millis(90_000),
            timeout_per_megabyte: Duration::from_millis(2_000),
            timeout_ceiling: Duration::from_millis(300_000),
            large_input_threshold_megabytes: 100.0,
            anchors: DEFAULT_ANCHORS,
            dimension_retry_limit: 30,
            dimension_base_delay: Duration::from_millis(300),
            dimension_base_delay_large: Duration::from_millis(500),
            dimension_delay_cap: Duration::from_millis(5_000),
            seek_settle: Duration::from_millis(500),
            seek_settle_large: Duration::from_millis(800),
            seek_poll_limit: 15,
            seek_poll_limit_large: 25,
            seek_poll_interval: Duration::from_millis(300),
            seek_poll_interval_large: Duration::from_millis(500),
            render_settle: Duration::from_millis(400),
            presented_frame_settle: Duration::from_millis(100),
            fast_path_settle: Duration::from_millis(300),
            anchor_escalation_delay: Duration::from_millis(500),
            anchor_escalation_delay_large: Duration::from_millis(1_000),
            readiness_poll: Duration::from_millis(100),
        }
    }
}

/// Encoding settings for the two output rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    /// JPEG quality (1–100) of the full-resolution preview.
    pub preview_quality: u8,
    /// JPEG quality (1–100) of the API raster.
    pub api_quality: u8,
    /// Longest side of the API raster. Frames are only ever scaled down.
    pub api_max_dimension: u32,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            preview_quality: 85,
            api_quality: 50,
            api_max_dimension: 512,
        }
    }
}

/// Configuration for a single extraction.
///
/// All fields have sensible defaults. A default-constructed value behaves
/// exactly like the built-in capture policy.
#[derive(Clone)]
pub struct ExtractOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) tuning: CaptureTuning,
    pub(crate) raster: RasterOptions,
    pub(crate) timeout_override: Option<Duration>,
}

impl Debug for ExtractOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractOptions")
            .field("has_progress", &true)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("tuning", &self.tuning)
            .field("raster", &self.raster)
            .field("timeout_override", &self.timeout_override)
            .finish()
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            tuning: CaptureTuning::default(),
            raster: RasterOptions::default(),
            timeout_override: None,
        }
    }

    /// Attach a progress callback, fired on every state transition.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// The controller checks the token before every step and resolves with
    /// [`SnapError::Cancelled`](crate::SnapError::Cancelled) once it is set.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Replace the retry and settle tuning.
    #[must_use]
    pub fn with_tuning(mut self, tuning: CaptureTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Replace the raster encoding settings.
    #[must_use]
    pub fn with_raster(mut self, raster: RasterOptions) -> Self {
        self.raster = raster;
        self
    }

    /// Use a fixed global budget instead of the size-derived one.
    #[must_use]
    pub fn with_timeout_budget(mut self, budget: Duration) -> Self {
        self.timeout_override = Some(budget);
        self
    }

    /// The retry and settle tuning in effect.
    pub fn tuning(&self) -> &CaptureTuning {
        &self.tuning
    }

    /// The raster settings in effect.
    pub fn raster(&self) -> RasterOptions {
        self.raster
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}
