use std::time::{Duration, Instant};

use super::{CaptureError, StopSignal};

/// Fixed-period pacing measured start to start.
///
/// Each tick targets `previous ideal start + period`. The ticker sleeps on the
/// [`StopSignal`] until `spin_threshold` before the boundary, then spins for
/// the remainder. When a boundary has already passed the tick is an overrun:
/// with `catch_up` the missed periods are skipped and the next future
/// boundary is awaited, otherwise the schedule restarts from now.
#[derive(Debug)]
pub struct PeriodicTicker {
    period: Duration,
    stop: StopSignal,
    spin_threshold: Duration,
    catch_up: bool,
    next: Instant,
    overrun_count: u64,
}

impl PeriodicTicker {
    pub const DEFAULT_SPIN_THRESHOLD: Duration = Duration::from_millis(1);

    pub fn new(fps: f64, stop: StopSignal) -> Result<Self, CaptureError> {
        Self::with_options(fps, stop, Self::DEFAULT_SPIN_THRESHOLD, true)
    }

    /// Fails unless `fps` is positive and finite with a non-zero period.
    pub fn with_options(
        fps: f64,
        stop: StopSignal,
        spin_threshold: Duration,
        catch_up: bool,
    ) -> Result<Self, CaptureError> {
        let period = Duration::try_from_secs_f64(1.0 / fps)
            .ok()
            .filter(|p| fps > 0.0 && !p.is_zero())
            .ok_or(CaptureError::InvalidFrameRate(fps))?;
        Ok(Self {
            period,
            stop,
            spin_threshold,
            catch_up,
            next: Instant::now(),
            overrun_count: 0,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Block until the next boundary; returns its ideal start time, or
    /// `None` once the stop signal is set.
    pub fn wait_next(&mut self) -> Option<Instant> {
        self.next += self.period;
        loop {
            if self.stop.is_stopped() {
                return None;
            }
            let now = Instant::now();
            if now >= self.next {
                self.overrun_count += 1;
                if !self.catch_up {
                    self.next = now;
                    return Some(self.next);
                }
                let late = (now - self.next).as_secs_f64();
                let skip = (late / self.period.as_secs_f64()).floor() as u32 + 1;
                self.next += self.period * skip;
                continue;
            }

            let remain = self.next - now;
            if remain > self.spin_threshold {
                self.stop.wait_timeout(remain - self.spin_threshold);
                continue;
            }

            while Instant::now() < self.next {
                if self.stop.is_stopped() {
                    return None;
                }
                std::hint::spin_loop();
            }
            return Some(self.next);
        }
    }
}
