//! Progress reporting and cancellation support.
//!
//! [`ProgressCallback`] observes the capture state machine as it moves
//! between states, and [`CancellationToken`] lets a caller abandon an
//! extraction cooperatively.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use snapframe::{CaptureState, ExtractOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let CaptureState::AwaitSeekStable { anchor } = info.stage {
//!             println!("waiting for {anchor:?} to settle");
//!         }
//!     }
//! }
//!
//! let options = ExtractOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::time::Instant;

use crate::controller::CaptureState;

/// A snapshot delivered on every state transition.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// The state just entered.
    pub stage: CaptureState,
    /// Number of transitions reported so far, including this one.
    pub transitions: u64,
    /// Wall-clock time since the extraction started.
    pub elapsed: Duration,
}

/// Trait for receiving progress updates during extraction.
///
/// Implementations must be [`Send`] and [`Sync`] because several
/// extractions may share one callback across tasks.
///
/// Progress callbacks are **infallible**: they observe but cannot halt
/// the operation. Use [`CancellationToken`] for cooperative cancellation.
pub trait ProgressCallback: Send + Sync {
    /// Called once per state transition.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications. Used when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between tasks; call
/// [`cancel`](CancellationToken::cancel) from anywhere to stop the
/// associated extraction at its next step.
///
/// # Example
///
/// ```
/// use snapframe::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks timing for one extraction and emits callbacks.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    transitions: u64,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>) -> Self {
        Self {
            callback,
            transitions: 0,
            start_time: Instant::now(),
        }
    }

    /// Report entry into `stage`.
    pub(crate) fn report(&mut self, stage: CaptureState) {
        self.transitions += 1;
        let info = ProgressInfo {
            stage,
            transitions: self.transitions,
            elapsed: self.start_time.elapsed(),
        };
        self.callback.on_progress(&info);
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
