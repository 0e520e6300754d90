//! Size-derived capture policy.
//!
//! [`CapturePolicy`] is computed once per extraction from the input size
//! and the configured [`CaptureTuning`]. It fixes the global timeout budget
//! and the ordered anchor list, and resolves every retry parameter that
//! depends on whether the input counts as large. It is a pure value: no
//! I/O, no shared state, safe to compute from any number of tasks.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use snapframe::{CapturePolicy, CaptureTuning};
//!
//! let policy = CapturePolicy::for_size(5 * 1024 * 1024, &CaptureTuning::default());
//! assert_eq!(policy.timeout_budget(), Duration::from_millis(100_000));
//! assert_eq!(policy.anchor_count(), 3);
//! ```

use std::time::Duration;

use crate::{
    configuration::CaptureTuning,
    input::{MediaInput, megabytes},
};

/// Start, 10 % and 30 % of the duration.
pub const DEFAULT_ANCHORS: [f64; 3] = [0.0, 0.1, 0.3];

/// Timeout budget and retry parameters for one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePolicy {
    timeout_budget: Duration,
    anchors: [f64; 3],
    large_input: bool,
    dimension_retry_limit: u32,
    dimension_base_delay: Duration,
    dimension_delay_cap: Duration,
    seek_settle: Duration,
    seek_poll_limit: u32,
    seek_poll_interval: Duration,
    anchor_escalation_delay: Duration,
    render_settle: Duration,
    presented_frame_settle: Duration,
    fast_path_settle: Duration,
    readiness_poll: Duration,
}

impl CapturePolicy {
    /// Derive the policy for `input`.
    pub fn for_input(input: &MediaInput, tuning: &CaptureTuning) -> Self {
        Self::for_megabytes(input.size_in_megabytes(), tuning)
    }

    /// Derive the policy for an input of `size_bytes`.
    pub fn for_size(size_bytes: u64, tuning: &CaptureTuning) -> Self {
        Self::for_megabytes(megabytes(size_bytes), tuning)
    }

    fn for_megabytes(megabytes: f64, tuning: &CaptureTuning) -> Self {
        let large_input = megabytes > tuning.large_input_threshold_megabytes;
        let pick = |small: Duration, large: Duration| if large_input { large } else { small };

        Self {
            timeout_budget: timeout_budget_for(megabytes, tuning),
            anchors: tuning.anchors,
            large_input,
            dimension_retry_limit: tuning.dimension_retry_limit,
            dimension_base_delay: pick(
                tuning.dimension_base_delay,
                tuning.dimension_base_delay_large,
            ),
            dimension_delay_cap: tuning.dimension_delay_cap,
            seek_settle: pick(tuning.seek_settle, tuning.seek_settle_large),
            seek_poll_limit: if large_input {
                tuning.seek_poll_limit_large
            } else {
                tuning.seek_poll_limit
            },
            seek_poll_interval: pick(tuning.seek_poll_interval, tuning.seek_poll_interval_large),
            anchor_escalation_delay: pick(
                tuning.anchor_escalation_delay,
                tuning.anchor_escalation_delay_large,
            ),
            render_settle: tuning.render_settle,
            presented_frame_settle: tuning.presented_frame_settle,
            fast_path_settle: tuning.fast_path_settle,
            readiness_poll: tuning.readiness_poll,
        }
    }

    /// Replace the size-derived budget with a fixed one.
    pub(crate) fn with_timeout_budget(mut self, budget: Duration) -> Self {
        self.timeout_budget = budget;
        self
    }

    /// Global budget for the whole extraction.
    pub fn timeout_budget(&self) -> Duration {
        self.timeout_budget
    }

    /// Ordered fractional-duration anchors.
    pub fn anchors(&self) -> &[f64] {
        &self.anchors
    }

    /// Number of anchors that will be attempted. Always three.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Whether the input is above the large-input threshold.
    pub fn is_large_input(&self) -> bool {
        self.large_input
    }

    /// Playback position of anchor `index` for a media of `duration_seconds`.
    ///
    /// Returns `None` when the index is past the last anchor or the duration
    /// is not a positive finite number.
    pub fn anchor_position(&self, index: usize, duration_seconds: f64) -> Option<Duration> {
        if !(duration_seconds.is_finite() && duration_seconds > 0.0) {
            return None;
        }
        let fraction = *self.anchors.get(index)?;
        Duration::try_from_secs_f64(duration_seconds * fraction.clamp(0.0, 1.0)).ok()
    }

    /// Delay before dimension retry number `retry` (1-based):
    /// `min(base * retry, cap)`.
    pub fn dimension_backoff(&self, retry: u32) -> Duration {
        self.dimension_base_delay
            .saturating_mul(retry)
            .min(self.dimension_delay_cap)
    }

    /// Maximum dimension retries.
    pub fn dimension_retry_limit(&self) -> u32 {
        self.dimension_retry_limit
    }

    /// Wait after a completed seek before the first readiness poll.
    pub fn seek_settle(&self) -> Duration {
        self.seek_settle
    }

    /// Readiness polls per anchor before escalating.
    pub fn seek_poll_limit(&self) -> u32 {
        self.seek_poll_limit
    }

    /// Spacing between readiness polls.
    pub fn seek_poll_interval(&self) -> Duration {
        self.seek_poll_interval
    }

    /// Pause before moving on to the next anchor.
    pub fn anchor_escalation_delay(&self) -> Duration {
        self.anchor_escalation_delay
    }

    /// Settle before rasterizing when no presentation signal exists.
    pub fn render_settle(&self) -> Duration {
        self.render_settle
    }

    /// Settle after a presentation signal.
    pub fn presented_frame_settle(&self) -> Duration {
        self.presented_frame_settle
    }

    /// Settle before capturing at the current position without seeking.
    pub fn fast_path_settle(&self) -> Duration {
        self.fast_path_settle
    }

    /// Poll spacing while dimensions are known but data is not yet decoded.
    pub fn readiness_poll(&self) -> Duration {
        self.readiness_poll
    }
}

/// `min(base + per_megabyte * megabytes, ceiling)`.
fn timeout_budget_for(megabytes: f64, tuning: &CaptureTuning) -> Duration {
    let base = tuning.timeout_base.as_secs_f64();
    let per_megabyte = tuning.timeout_per_megabyte.as_secs_f64();
    let ceiling = tuning.timeout_ceiling.as_secs_f64();
    let seconds = (base + per_megabyte * megabytes.max(0.0)).min(ceiling);
    Duration::try_from_secs_f64(seconds).unwrap_or(tuning.timeout_ceiling)
}
