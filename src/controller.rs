//! The capture state machine.
//!
//! [`FallbackController`] drives a [`DecoderSession`] through the anchor
//! attempts of a [`CapturePolicy`], applying the per-attempt retry and
//! backoff rules, and hands the first capture-safe picture to the
//! [`Rasterizer`]. It resolves exactly once, with either a capture or a
//! typed failure, and releases the session on every path.
//!
//! ```text
//! Init -> AwaitMetadata -> Seeking(n) -> AwaitSeekStable(n) -> Capturing -> Done
//!                  \                          |  ^                 \
//!                   \                         |  | poll retries     \-> Failed
//!                    \-> AwaitSeekStable(-)   v  |
//!                        (fast path)       Seeking(n + 1) ...
//! ```
//!
//! The global budget wraps the whole run in a single
//! [`tokio::time::timeout_at`]: when it fires, the in-flight wait is
//! dropped mid-retry and nothing it would have done afterwards happens.

use std::{cell::OnceCell, time::Duration};

use tokio::time::Instant;

use crate::{
    configuration::ExtractOptions,
    decoder::{DecoderBackend, DecoderSignal, Readiness},
    error::SnapError,
    extract::ExtractionResult,
    input::MediaInput,
    policy::CapturePolicy,
    progress::{CancellationToken, ProgressTracker},
    rasterizer::{Rasterizer, Rasters},
    session::DecoderSession,
};

/// States of the capture state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Controller created, decoder not yet asked for anything.
    Init,
    /// Waiting for duration or first decoded data.
    AwaitMetadata,
    /// A seek to the given anchor is in flight.
    Seeking {
        /// Anchor index.
        anchor: usize,
    },
    /// Waiting for the decoder to settle. `None` means the current
    /// position, without a seek.
    AwaitSeekStable {
        /// Anchor index, if any.
        anchor: Option<usize>,
    },
    /// Rasterizing a capture-safe picture.
    Capturing,
    /// Resolved with a capture.
    Done,
    /// Resolved with a failure.
    Failed,
}

impl CaptureState {
    /// `Done` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, CaptureState::Done | CaptureState::Failed)
    }
}

/// Bookkeeping for the attempt currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureAttempt {
    /// Anchor being attempted. `None` for captures at the current position.
    pub anchor_index: Option<usize>,
    /// Dimension retries spent so far.
    pub dimension_retry_count: u32,
    /// Readiness polls spent since the seek completed.
    pub seek_retry_count: u32,
}

impl CaptureAttempt {
    fn new(anchor_index: Option<usize>) -> Self {
        Self {
            anchor_index,
            dimension_retry_count: 0,
            seek_retry_count: 0,
        }
    }
}

/// A successful capture, before it is wrapped for the caller.
#[derive(Debug)]
struct Capture {
    rasters: Rasters,
    anchor: Option<usize>,
    position: Duration,
}

/// Drives one extraction from open to resolution.
///
/// [`extract_frames_with`](crate::extract_frames_with) is the usual way in;
/// the controller is public for callers that want to observe its state
/// around the run.
///
/// ```no_run
/// use snapframe::{CaptureState, ExtractOptions, FallbackController, FfmpegBackend, MediaInput};
///
/// # async fn example() -> Result<(), snapframe::SnapError> {
/// let input = MediaInput::from_path("clip.mp4")?;
/// let mut controller =
///     FallbackController::open(&input, FfmpegBackend::new(), &ExtractOptions::new())?;
/// let result = controller.drive().await;
/// assert_eq!(
///     controller.resolution(),
///     Some(if result.is_ok() { CaptureState::Done } else { CaptureState::Failed })
/// );
/// # Ok(())
/// # }
/// ```
pub struct FallbackController<B: DecoderBackend> {
    session: DecoderSession<B>,
    policy: CapturePolicy,
    rasterizer: Rasterizer,
    state: CaptureState,
    attempt: Option<CaptureAttempt>,
    tracker: ProgressTracker,
    cancellation: Option<CancellationToken>,
    deadline: Instant,
    resolution: OnceCell<CaptureState>,
}

impl<B: DecoderBackend> FallbackController<B> {
    /// Open a session for `input` and arm the global budget.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if loading cannot be started.
    pub fn open(input: &MediaInput, backend: B, options: &ExtractOptions) -> Result<Self, SnapError> {
        let mut policy = CapturePolicy::for_input(input, &options.tuning);
        if let Some(budget) = options.timeout_override {
            policy = policy.with_timeout_budget(budget);
        }
        log::debug!(
            "Capture policy: budget={:?}, anchors={:?}, large_input={}",
            policy.timeout_budget(),
            policy.anchors(),
            policy.is_large_input()
        );

        let tracker = ProgressTracker::new(options.progress.clone());
        let session = DecoderSession::open(backend, input)?;
        let deadline = Instant::now() + policy.timeout_budget();

        Ok(Self {
            session,
            policy,
            rasterizer: Rasterizer::new(options.raster),
            state: CaptureState::Init,
            attempt: None,
            tracker,
            cancellation: options.cancellation.clone(),
            deadline,
            resolution: OnceCell::new(),
        })
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// The policy this controller runs under.
    pub fn policy(&self) -> &CapturePolicy {
        &self.policy
    }

    /// The terminal state, once resolved.
    pub fn resolution(&self) -> Option<CaptureState> {
        self.resolution.get().copied()
    }

    /// Run to resolution and release the decoder.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure the run ended in, or
    /// [`SnapError::AlreadyResolved`] if this controller has already run.
    pub async fn drive(&mut self) -> Result<ExtractionResult, SnapError> {
        if let Some(resolution) = self.resolution() {
            return Err(SnapError::AlreadyResolved(resolution));
        }
        let budget = self.policy.timeout_budget();
        let outcome = match tokio::time::timeout_at(self.deadline, self.run()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log::warn!("Frame capture timed out after {budget:?} in state {:?}", self.state);
                Err(SnapError::Timeout(budget))
            }
        };
        self.resolve(&outcome);
        let capture = outcome?;
        Ok(ExtractionResult {
            preview: capture.rasters.preview,
            api: capture.rasters.api,
            anchor: capture.anchor,
            position: capture.position,
            elapsed: self.tracker.elapsed(),
        })
    }

    /// The only path into `Done`/`Failed`, and the only release site.
    /// Outcomes after the first are ignored.
    fn resolve(&mut self, outcome: &Result<Capture, SnapError>) {
        let terminal = match outcome {
            Ok(_) => CaptureState::Done,
            Err(_) => CaptureState::Failed,
        };
        if self.resolution.set(terminal).is_err() {
            log::trace!("Ignoring {terminal:?} outcome after resolution");
            return;
        }

        self.transition(terminal);
        match outcome {
            Ok(capture) => log::info!(
                "Captured frame at {:?} (anchor={:?}) in {:?}",
                capture.position,
                capture.anchor,
                self.tracker.elapsed()
            ),
            Err(error) => log::warn!("Frame capture failed: {error}"),
        }
        self.attempt = None;
        self.session.release();
    }

    async fn run(&mut self) -> Result<Capture, SnapError> {
        self.transition(CaptureState::AwaitMetadata);
        self.await_metadata().await?;
        self.plan_capture().await
    }

    /// Wait for a usable duration or for the first decoded data.
    async fn await_metadata(&mut self) -> Result<(), SnapError> {
        loop {
            self.checkpoint()?;
            let signal = self.session.await_signal().await?;
            let state = self.session.snapshot_state();
            match signal {
                DecoderSignal::DataLoaded => return Ok(()),
                DecoderSignal::MetadataLoaded
                | DecoderSignal::CanPlay
                | DecoderSignal::CanPlayThrough
                    if state.has_valid_duration() =>
                {
                    return Ok(());
                }
                other => log::trace!("Ignoring {other:?} while awaiting metadata"),
            }
        }
    }

    async fn plan_capture(&mut self) -> Result<Capture, SnapError> {
        if self.session.snapshot_state().is_capture_ready() {
            log::debug!("Decoded data already available; trying the current position first");
            self.begin_attempt(None);
            self.transition(CaptureState::AwaitSeekStable { anchor: None });
            self.session.idle(self.policy.fast_path_settle()).await?;
            self.checkpoint()?;
            if self.session.snapshot_state().is_capture_ready() {
                return self.capture_frame().await;
            }
            log::debug!("Readiness regressed during settle; falling back to anchors");
        }

        let state = self.session.snapshot_state();
        let duration = match state.duration {
            Some(seconds) if state.has_valid_duration() => seconds,
            _ => {
                log::warn!("Duration unknown; capturing at the current position");
                self.begin_attempt(None);
                self.transition(CaptureState::AwaitSeekStable { anchor: None });
                if state.is_capture_ready() {
                    self.session.idle(self.policy.fast_path_settle()).await?;
                }
                return self.capture_frame().await;
            }
        };

        for index in 0..self.policy.anchor_count() {
            if index > 0 {
                self.session
                    .idle(self.policy.anchor_escalation_delay())
                    .await?;
            }
            if let Some(capture) = self.try_anchor(index, duration).await? {
                return Ok(capture);
            }
            log::warn!("Anchor {index} exhausted its settle retries");
        }

        self.last_resort().await
    }

    /// Seek to anchor `index` and wait for it to settle.
    ///
    /// `Ok(None)` means the anchor is exhausted and the caller should
    /// escalate.
    async fn try_anchor(&mut self, index: usize, duration: f64) -> Result<Option<Capture>, SnapError> {
        self.checkpoint()?;
        let Some(position) = self.policy.anchor_position(index, duration) else {
            return Ok(None);
        };

        self.begin_attempt(Some(index));
        self.transition(CaptureState::Seeking { anchor: index });
        match self.session.seek(position) {
            Ok(()) => {}
            Err(error @ SnapError::DecodeError(_)) => return Err(error),
            Err(error) => {
                log::warn!("Seek to anchor {index} ({position:?}) rejected: {error}");
                return Ok(None);
            }
        }
        self.await_seeked().await?;

        self.transition(CaptureState::AwaitSeekStable {
            anchor: Some(index),
        });
        self.session.idle(self.policy.seek_settle()).await?;

        let limit = self.policy.seek_poll_limit().max(1);
        loop {
            self.checkpoint()?;
            if self.session.snapshot_state().is_capture_ready() {
                self.session.settle_render(&self.policy).await?;
                return self.capture_frame().await.map(Some);
            }

            let attempt = self.current_attempt();
            attempt.seek_retry_count += 1;
            let polls = attempt.seek_retry_count;
            if polls >= limit {
                return Ok(None);
            }
            log::debug!("Anchor {index} not ready after poll {polls}/{limit}");
            self.session.idle(self.policy.seek_poll_interval()).await?;
        }
    }

    async fn await_seeked(&mut self) -> Result<(), SnapError> {
        loop {
            self.checkpoint()?;
            match self.session.await_signal().await? {
                DecoderSignal::Seeked => return Ok(()),
                other => log::trace!("Ignoring {other:?} while seeking"),
            }
        }
    }

    /// Capture at the current position once every anchor is exhausted.
    async fn last_resort(&mut self) -> Result<Capture, SnapError> {
        self.checkpoint()?;
        if self.session.snapshot_state().is_capture_ready() {
            log::warn!("All anchors exhausted; capturing at the current position");
            self.begin_attempt(None);
            return self.capture_frame().await;
        }
        Err(SnapError::FrameCaptureExhausted {
            anchors: self.policy.anchor_count(),
        })
    }

    /// Wait for dimensions and decoded data, then rasterize.
    async fn capture_frame(&mut self) -> Result<Capture, SnapError> {
        let limit = self.policy.dimension_retry_limit();
        loop {
            self.checkpoint()?;
            let state = self.session.snapshot_state();

            if !state.has_dimensions() {
                let attempt = self.current_attempt();
                attempt.dimension_retry_count += 1;
                let retry = attempt.dimension_retry_count;
                if retry > limit {
                    return Err(SnapError::DimensionUnavailable { retries: limit });
                }
                let delay = self.policy.dimension_backoff(retry);
                log::debug!("Dimensions not available; retry {retry}/{limit} in {delay:?}");
                self.session.idle(delay).await?;
                continue;
            }

            if state.readiness < Readiness::DataDecoded {
                self.session.idle(self.policy.readiness_poll()).await?;
                continue;
            }

            self.transition(CaptureState::Capturing);
            let frame = self.session.frame()?;
            let rasters = self.rasterizer.capture(&frame)?;
            let anchor = self.attempt.and_then(|attempt| attempt.anchor_index);
            return Ok(Capture {
                rasters,
                anchor,
                position: state.position,
            });
        }
    }

    fn begin_attempt(&mut self, anchor_index: Option<usize>) {
        self.attempt = Some(CaptureAttempt::new(anchor_index));
    }

    fn current_attempt(&mut self) -> &mut CaptureAttempt {
        self.attempt.get_or_insert_with(|| CaptureAttempt::new(None))
    }

    fn checkpoint(&self) -> Result<(), SnapError> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
        {
            return Err(SnapError::Cancelled);
        }
        Ok(())
    }

    /// Move to `next`. A no-op once the controller is resolved.
    fn transition(&mut self, next: CaptureState) {
        if self.state.is_terminal() {
            log::trace!("Ignoring transition to {next:?} after resolution");
            return;
        }
        log::debug!("Capture state {:?} -> {next:?}", self.state);
        self.state = next;
        self.tracker.report(next);
    }
}
