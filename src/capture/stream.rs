use std::time::Duration;

use crate::config::CaptureConfig;
use crate::imaging::{AspectRatioPattern, ImageValue, ResolutionPattern};

use super::{CaptureError, FrameSession, SessionFactory, StopSignal, TargetId};

/// Size of the placeholder returned by stills taken while unbound.
const PLACEHOLDER_SIZE: u32 = 8;

/// Binding and polling limits of a [`CaptureStream`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    pub buffer_secs: f64,
    pub first_frame_retries: u32,
    pub first_frame_timeout: Duration,
    pub preload_max_width: u32,
    pub preload_max_height: u32,
}

impl StreamOptions {
    pub fn from_capture_config(config: &CaptureConfig) -> Self {
        Self {
            buffer_secs: config.buffer_secs,
            first_frame_retries: config.first_frame_retries,
            first_frame_timeout: Duration::from_secs_f64(config.first_frame_timeout_secs),
            preload_max_width: config.preload_max_width,
            preload_max_height: config.preload_max_height,
        }
    }

    fn retry_interval(&self) -> Duration {
        self.first_frame_timeout / self.first_frame_retries.max(1)
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from_capture_config(&CaptureConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unbound,
    Binding,
    Bound,
    Released,
}

/// Capture entry point: bind a window, take stills and clips, release.
///
/// ```text
/// Unbound ──set_capture_window(Some)──▶ Binding ──first frame──▶ Bound
///    ▲                                     │                       │
///    └──────── open failure / timeout ─────┘        release() ─────▶ Released
/// ```
///
/// The preload box only grows; growing it restarts a bound session so new
/// frames arrive at the larger size.
pub struct CaptureStream<F: SessionFactory> {
    factory: F,
    options: StreamOptions,
    target: Option<TargetId>,
    max_width: u32,
    max_height: u32,
    session: Option<Box<dyn FrameSession>>,
    state: StreamState,
    cancel: StopSignal,
}

impl<F: SessionFactory> CaptureStream<F> {
    pub fn new(factory: F, options: StreamOptions) -> Self {
        Self {
            max_width: options.preload_max_width,
            max_height: options.preload_max_height,
            factory,
            options,
            target: None,
            session: None,
            state: StreamState::Unbound,
            cancel: StopSignal::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn capture_window(&self) -> Option<TargetId> {
        self.target
    }

    pub fn max_size(&self) -> (u32, u32) {
        (self.max_width, self.max_height)
    }

    /// Token that aborts an in-progress first-frame wait. The abort is
    /// consumed by the wait it interrupts; one raised while nothing waits is
    /// discarded when the next wait begins.
    pub fn cancel_token(&self) -> StopSignal {
        self.cancel.clone()
    }

    /// Bind to `target`, or release with `None`.
    pub fn set_capture_window(&mut self, target: Option<TargetId>) -> Result<(), CaptureError> {
        let Some(target) = target else {
            self.target = None;
            self.release();
            return Ok(());
        };
        if self.state == StreamState::Bound && self.target == Some(target) {
            return Ok(());
        }

        self.close_session();
        self.target = Some(target);
        self.state = StreamState::Binding;
        if let Err(e) = self.open_session(target) {
            self.state = StreamState::Unbound;
            return Err(e);
        }
        match self.poll_frame(0.0) {
            Ok(_) => {
                self.state = StreamState::Bound;
                log::info!("Capture bound to {target}");
                Ok(())
            }
            Err(e) => {
                self.close_session();
                self.state = StreamState::Unbound;
                Err(e)
            }
        }
    }

    /// Grow the preload box; `None` leaves an axis alone. Restarts a live
    /// session when the box grew.
    pub fn set_max_size(&mut self, width: Option<u32>, height: Option<u32>) -> Result<(), CaptureError> {
        let mut grew = false;
        if let Some(w) = width.filter(|w| *w > self.max_width) {
            self.max_width = w;
            grew = true;
        }
        if let Some(h) = height.filter(|h| *h > self.max_height) {
            self.max_height = h;
            grew = true;
        }
        if grew {
            log::debug!("Capture preload box grew to {}x{}", self.max_width, self.max_height);
            self.restart_session()?;
        }
        Ok(())
    }

    /// [`set_max_size`](Self::set_max_size) from export size presets.
    pub fn set_max_size_pattern(
        &mut self,
        aspect: AspectRatioPattern,
        resolution: ResolutionPattern,
    ) -> Result<(), CaptureError> {
        let width = resolution.width();
        let height = match (width, aspect.ratio().size()) {
            (Some(w), Some((rw, rh))) => Some(((w as f64 * rh as f64 / rw as f64).round() as u32).max(1)),
            _ => None,
        };
        self.set_max_size(width, height)
    }

    /// Frame nearest `offset_secs` ago. Unbound streams yield a small black
    /// placeholder.
    pub fn capture_still(&mut self, offset_secs: f64) -> Result<ImageValue, CaptureError> {
        if self.session.is_none() {
            return Ok(ImageValue::empty(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE));
        }
        self.poll_frame(offset_secs)
    }

    /// The last `duration_secs` of capture at `fps`, oldest first.
    pub fn capture_animation(&self, fps: f64, duration_secs: f64) -> Result<Vec<ImageValue>, CaptureError> {
        let session = self.session.as_ref().ok_or(CaptureError::NotBound)?;
        Ok(session.snapshot(fps, duration_secs))
    }

    /// Close the session. Idempotent; the stream can be bound again.
    pub fn release(&mut self) {
        if self.close_session() {
            log::info!("Capture released");
        }
        self.state = StreamState::Released;
    }

    fn open_session(&mut self, target: TargetId) -> Result<(), CaptureError> {
        let session = self.factory.open(
            &target,
            self.options.buffer_secs,
            self.max_width,
            self.max_height,
        )?;
        self.session = Some(session);
        Ok(())
    }

    fn close_session(&mut self) -> bool {
        match self.session.take() {
            Some(mut session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    fn restart_session(&mut self) -> Result<(), CaptureError> {
        let Some(target) = self.target.filter(|_| self.state == StreamState::Bound) else {
            return Ok(());
        };
        self.close_session();
        if let Err(e) = self.open_session(target) {
            self.state = StreamState::Unbound;
            return Err(e);
        }
        Ok(())
    }

    /// Bounded poll for a frame: `retries + 1` attempts spread over the
    /// first-frame timeout.
    fn poll_frame(&self, offset_secs: f64) -> Result<ImageValue, CaptureError> {
        let session = self.session.as_ref().ok_or(CaptureError::NotBound)?;
        self.cancel.reset();
        let attempts = self.options.first_frame_retries + 1;
        let interval = self.options.retry_interval();
        for attempt in 1..=attempts {
            if let Some(frame) = session.frame_at(offset_secs) {
                return Ok(frame);
            }
            if attempt < attempts && self.cancel.wait_timeout(interval) {
                self.cancel.reset();
                return Err(CaptureError::Cancelled);
            }
        }
        Err(CaptureError::Timeout { attempts })
    }
}

impl<F: SessionFactory> Drop for CaptureStream<F> {
    fn drop(&mut self) {
        self.close_session();
    }
}
