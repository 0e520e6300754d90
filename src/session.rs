//! Decoder session: lifecycle of one decode resource.
//!
//! [`DecoderSession`] owns a [`DecoderBackend`] for a single input. It is
//! the only place that reads the backend's signal channel, so every wait
//! the controller performs (for a signal, for a backoff timer, for a
//! presented frame) also observes decode errors and aborts on them.
//!
//! The session releases its backend exactly once, either through an
//! explicit [`release`](DecoderSession::release) or when dropped.

use std::future::Future;
use std::time::Duration;

use image::DynamicImage;

use crate::{
    decoder::{DecoderBackend, DecoderSignal, DecoderState, SignalReceiver},
    error::SnapError,
    input::MediaInput,
    policy::CapturePolicy,
};

/// Owns one decode resource from open to release.
pub struct DecoderSession<B: DecoderBackend> {
    backend: B,
    signals: SignalReceiver,
    signals_closed: bool,
    decode_error: Option<String>,
    released: bool,
}

impl<B: DecoderBackend> DecoderSession<B> {
    /// Start loading `input` on `backend`. Does not wait for any signal.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if loading cannot be started. The
    /// backend is released before returning.
    pub fn open(mut backend: B, input: &MediaInput) -> Result<Self, SnapError> {
        log::debug!(
            "Opening decoder session (size={} bytes, mime={})",
            input.size(),
            input.mime_type()
        );
        let signals = match backend.open(input) {
            Ok(signals) => signals,
            Err(error) => {
                backend.release();
                return Err(error);
            }
        };
        Ok(Self {
            backend,
            signals,
            signals_closed: false,
            decode_error: None,
            released: false,
        })
    }

    /// Non-blocking view of the decoder.
    pub fn snapshot_state(&self) -> DecoderState {
        self.backend.snapshot()
    }

    /// Request a move to `position`. Completion arrives as
    /// [`DecoderSignal::Seeked`].
    ///
    /// # Errors
    ///
    /// Propagates a recorded decode error, or the backend's rejection.
    pub fn seek(&mut self, position: Duration) -> Result<(), SnapError> {
        self.check_error()?;
        log::debug!("Seeking to {position:?}");
        self.backend.seek(position)
    }

    /// The decoded picture at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`SnapError::RasterizationUnavailable`] if the session is
    /// released or the backend cannot produce a picture.
    pub fn frame(&self) -> Result<DynamicImage, SnapError> {
        if self.released {
            return Err(SnapError::RasterizationUnavailable(
                "decoder session already released".to_string(),
            ));
        }
        self.backend.frame()
    }

    /// Release the decode resource. Safe to call any number of times.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.signals.close();
        self.backend.release();
        log::debug!("Decoder session released");
    }

    /// Whether [`release`](DecoderSession::release) has run.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Wait for the next signal from the decoder.
    ///
    /// An [`DecoderSignal::Error`] is turned into
    /// [`SnapError::DecodeError`], as is the channel closing.
    pub(crate) async fn await_signal(&mut self) -> Result<DecoderSignal, SnapError> {
        self.check_error()?;
        if self.signals_closed {
            return Err(SnapError::DecodeError(
                "decoder stopped signalling".to_string(),
            ));
        }
        match self.signals.recv().await {
            Some(signal) => {
                self.absorb(&signal)?;
                Ok(signal)
            }
            None => {
                self.signals_closed = true;
                Err(SnapError::DecodeError(
                    "decoder stopped signalling".to_string(),
                ))
            }
        }
    }

    /// Sleep for `delay`, aborting early on a decode error.
    pub(crate) async fn idle(&mut self, delay: Duration) -> Result<(), SnapError> {
        self.until(tokio::time::sleep(delay)).await
    }

    /// Wait until the current picture is actually painted.
    ///
    /// Uses the backend's frame-presentation signal plus a short settle when
    /// available, and a fixed settle otherwise.
    pub(crate) async fn settle_render(&mut self, policy: &CapturePolicy) -> Result<(), SnapError> {
        match self.backend.request_frame_presentation() {
            Some(presented) => {
                if self.until(presented).await?.is_err() {
                    // Presentation sender dropped; fall back to the fixed settle.
                    return self.idle(policy.render_settle()).await;
                }
                self.idle(policy.presented_frame_settle()).await
            }
            None => self.idle(policy.render_settle()).await,
        }
    }

    /// Drive `future` to completion while absorbing decoder signals.
    async fn until<F: Future>(&mut self, future: F) -> Result<F::Output, SnapError> {
        self.check_error()?;
        tokio::pin!(future);
        loop {
            tokio::select! {
                output = &mut future => {
                    self.check_error()?;
                    return Ok(output);
                }
                signal = self.signals.recv(), if !self.signals_closed => match signal {
                    Some(signal) => self.absorb(&signal)?,
                    None => self.signals_closed = true,
                },
            }
        }
    }

    fn absorb(&mut self, signal: &DecoderSignal) -> Result<(), SnapError> {
        log::trace!("Decoder signal: {signal:?}");
        if let DecoderSignal::Error(message) = signal {
            self.decode_error = Some(message.clone());
            return Err(SnapError::DecodeError(message.clone()));
        }
        Ok(())
    }

    fn check_error(&mut self) -> Result<(), SnapError> {
        if self.decode_error.is_none() {
            self.decode_error = self.backend.snapshot().last_error;
        }
        match &self.decode_error {
            Some(message) => Err(SnapError::DecodeError(message.clone())),
            None => Ok(()),
        }
    }
}

impl<B: DecoderBackend> Drop for DecoderSession<B> {
    fn drop(&mut self) {
        self.release();
    }
}
