use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::imaging::{ImageValue, ResizeSpec, resize_contain};

use super::{CaptureError, FrameRing, PeriodicTicker, ScreenSource, StopSignal, TargetId, lock};

/// A running capture of one target with buffered history.
pub trait FrameSession: Send {
    /// Frame nearest to `offset_secs` before now (0 = newest).
    fn frame_at(&self, offset_secs: f64) -> Option<ImageValue>;

    /// The last `duration_secs` resampled at `fps`, oldest first.
    fn snapshot(&self, fps: f64, duration_secs: f64) -> Vec<ImageValue>;

    /// Stop capturing. Idempotent.
    fn close(&mut self);
}

/// Opens [`FrameSession`]s.
pub trait SessionFactory {
    fn open(
        &mut self,
        target: &TargetId,
        buffer_secs: f64,
        max_width: u32,
        max_height: u32,
    ) -> Result<Box<dyn FrameSession>, CaptureError>;
}

/// Production factory: one grabber thread per session pulling frames from a
/// shared [`ScreenSource`] at a fixed rate.
pub struct SourceSessionFactory<S> {
    source: Arc<Mutex<S>>,
    frame_rate: f64,
}

impl<S: ScreenSource + 'static> SourceSessionFactory<S> {
    pub fn new(source: Arc<Mutex<S>>, frame_rate: f64) -> Self {
        Self { source, frame_rate }
    }

    pub fn source(&self) -> &Arc<Mutex<S>> {
        &self.source
    }
}

impl<S: ScreenSource + 'static> SessionFactory for SourceSessionFactory<S> {
    fn open(
        &mut self,
        target: &TargetId,
        buffer_secs: f64,
        max_width: u32,
        max_height: u32,
    ) -> Result<Box<dyn FrameSession>, CaptureError> {
        let ring = Arc::new(Mutex::new(FrameRing::new(Duration::from_secs_f64(
            buffer_secs.max(0.0),
        ))));
        let stop = StopSignal::new();
        let preload = ResizeSpec::exact(max_width, max_height)
            .map_err(|e| CaptureError::Source(format!("invalid preload size: {e}")))?;

        let grabber = Grabber {
            source: Arc::clone(&self.source),
            target: *target,
            ring: Arc::clone(&ring),
            preload,
            max_width,
            max_height,
        };
        let mut ticker = PeriodicTicker::new(self.frame_rate, stop.clone())?;
        let handle = thread::Builder::new()
            .name(format!("capture-{target}"))
            .spawn(move || grabber.run(&mut ticker))?;

        log::info!("Capture session opened for {target} ({max_width}x{max_height} preload)");
        Ok(Box::new(GrabberSession {
            ring,
            stop,
            handle: Some(handle),
        }))
    }
}

struct Grabber<S> {
    source: Arc<Mutex<S>>,
    target: TargetId,
    ring: Arc<Mutex<FrameRing>>,
    preload: ResizeSpec,
    max_width: u32,
    max_height: u32,
}

impl<S: ScreenSource> Grabber<S> {
    fn run(self, ticker: &mut PeriodicTicker) {
        while ticker.wait_next().is_some() {
            let captured = lock(&self.source).capture(&self.target);
            match captured {
                Ok(Some(frame)) => {
                    let frame = self.fit_preload(frame);
                    lock(&self.ring).push(Instant::now(), frame);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Capture of {} stopped: {e}", self.target);
                    break;
                }
            }
        }
        log::debug!(
            "Grabber for {} exited ({} overruns)",
            self.target,
            ticker.overrun_count()
        );
    }

    fn fit_preload(&self, frame: ImageValue) -> ImageValue {
        if frame.width() > self.max_width || frame.height() > self.max_height {
            resize_contain(&frame, &self.preload)
        } else {
            frame
        }
    }
}

struct GrabberSession {
    ring: Arc<Mutex<FrameRing>>,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl FrameSession for GrabberSession {
    fn frame_at(&self, offset_secs: f64) -> Option<ImageValue> {
        lock(&self.ring).nearest(Instant::now(), offset_secs)
    }

    fn snapshot(&self, fps: f64, duration_secs: f64) -> Vec<ImageValue> {
        lock(&self.ring).window(Instant::now(), fps, duration_secs)
    }

    fn close(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Capture grabber thread panicked");
            }
        }
    }
}

impl Drop for GrabberSession {
    fn drop(&mut self) {
        self.close();
    }
}
