use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::imaging::ImageValue;

/// Time-stamped frames covering the last `duration` of capture.
///
/// Lookups are expressed as ages relative to a caller-supplied `now`, so the
/// ring itself never reads the clock.
#[derive(Debug)]
pub struct FrameRing {
    frames: VecDeque<(Instant, ImageValue)>,
    duration: Duration,
}

impl FrameRing {
    pub fn new(duration: Duration) -> Self {
        Self {
            frames: VecDeque::new(),
            duration,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append a frame and drop frames older than the ring duration, measured
    /// from the newest frame.
    pub fn push(&mut self, at: Instant, frame: ImageValue) {
        self.frames.push_back((at, frame));
        while let Some((oldest, _)) = self.frames.front() {
            if at.saturating_duration_since(*oldest) > self.duration {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn latest(&self) -> Option<ImageValue> {
        self.frames.back().map(|(_, frame)| frame.clone())
    }

    /// Frame whose age at `now` is closest to `offset_secs` (0 = newest).
    pub fn nearest(&self, now: Instant, offset_secs: f64) -> Option<ImageValue> {
        let offset = offset_secs.max(0.0);
        self.frames
            .iter()
            .min_by(|(a, _), (b, _)| {
                let da = (age(now, *a) - offset).abs();
                let db = (age(now, *b) - offset).abs();
                da.total_cmp(&db)
            })
            .map(|(_, frame)| frame.clone())
    }

    /// Resample the last `duration_secs` at `fps`, oldest first.
    ///
    /// Sample points older than the buffered history are never generated, so
    /// a short buffer yields a shorter clip rather than repeated first frames
    /// and the clip length is bounded by the history whatever `duration_secs`.
    pub fn window(&self, now: Instant, fps: f64, duration_secs: f64) -> Vec<ImageValue> {
        let Some((oldest, _)) = self.frames.front() else {
            return Vec::new();
        };
        if !(fps > 0.0 && fps.is_finite() && duration_secs >= 0.0) {
            return Vec::new();
        }
        let period = 1.0 / fps;
        let history = (age(now, *oldest) * fps + 0.5).floor() as usize + 1;
        let count = ((duration_secs * fps).round() as usize).clamp(1, history);
        (0..count)
            .rev()
            .filter_map(|i| self.nearest(now, i as f64 * period))
            .collect()
    }
}

fn age(now: Instant, at: Instant) -> f64 {
    now.saturating_duration_since(at).as_secs_f64()
}
