//! Continuous screen capture with a short look-back buffer.
//!
//! | Module | Role |
//! |---|---|
//! | `source` | [`ScreenSource`] backends and the switchable [`SourceSlot`] |
//! | `ring` | [`FrameRing`], time-stamped frames trimmed to the buffer length |
//! | `session` | [`FrameSession`]s: a grabber thread feeding a ring |
//! | `stream` | [`CaptureStream`], the bind / capture / release state machine |
//! | `ticker` | [`PeriodicTicker`], fixed-rate pacing for the grabber |
//!
//! The stream owns at most one session. Binding a window opens a session and
//! waits (bounded) for its first frame; stills and animations are then read
//! from the session's ring without touching the source.

mod ring;
mod session;
mod source;
mod stream;
mod ticker;

pub use ring::FrameRing;
pub use session::{FrameSession, SessionFactory, SourceSessionFactory};
pub use source::{BackendKind, BlankSource, CaptureTarget, ScreenSource, SourceSlot, TargetId};
pub use stream::{CaptureStream, StreamOptions, StreamState};
pub use ticker::PeriodicTicker;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame captured after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("capture cancelled")]
    Cancelled,
    #[error("capture source error: {0}")]
    Source(String),
    #[error("no capture window bound")]
    NotBound,
    #[error("frame rate must be a positive number, got {0}")]
    InvalidFrameRate(f64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared stop flag that sleeping threads can wait on.
///
/// Used both to stop grabber threads and as the cancel token of a
/// [`CaptureStream`] bind.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stop(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    pub fn reset(&self) {
        *self.flag() = false;
    }

    pub fn is_stopped(&self) -> bool {
        *self.flag()
    }

    /// Sleep up to `timeout`, waking early on [`stop`](Self::stop).
    /// Returns whether the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.flag();
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Lock a mutex shared with a capture thread, ignoring poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
