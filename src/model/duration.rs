//! Frame durations that are both legal in a GIF and meaningful as a frame rate.
//!
//! GIF frame delays have 10 ms resolution. The map holds, for each standard
//! frame rate, the nearest duration on that grid:
//!
//! | Source | Rates |
//! |---|---|
//! | Film / animation (23.976 fps, shot on ones to fours) | 23.976, 11.988, 7.992, 5.994 |
//! | 60 fps video divided down | 30, 20, 15, 12, 10 |

use std::sync::LazyLock;

/// 24000/1001, the film timeline most animation is produced on.
pub const FILM_FRAME_RATE: f64 = 24_000.0 / 1001.0;

const GIF_DELAY_STEP_MS: u32 = 10;

fn standard_frame_rates() -> Vec<f64> {
    let mut rates = vec![
        FILM_FRAME_RATE,
        FILM_FRAME_RATE / 2.0,
        FILM_FRAME_RATE / 3.0,
        FILM_FRAME_RATE / 4.0,
        60.0 / 2.0,
        60.0 / 3.0,
        60.0 / 4.0,
        60.0 / 5.0,
        60.0 / 6.0,
    ];
    rates.sort_by(f64::total_cmp);
    rates
}

/// One legal GIF duration and the frame rate it plays at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationEntry {
    pub duration_in_msec: u32,
    pub frame_rate: f64,
}

impl DurationEntry {
    fn new(duration_in_msec: u32) -> Self {
        Self {
            duration_in_msec,
            frame_rate: 1000.0 / duration_in_msec as f64,
        }
    }
}

/// First element minimizing `key`; ties keep the earlier element.
fn nearest<T: Copy>(items: &[T], key: impl Fn(&T) -> f64) -> T {
    let mut best = items[0];
    let mut best_key = key(&best);
    for item in &items[1..] {
        let k = key(item);
        if k < best_key {
            best = *item;
            best_key = k;
        }
    }
    best
}

#[derive(Debug)]
pub struct DurationMap {
    entries: Vec<DurationEntry>,
}

impl DurationMap {
    fn build() -> Self {
        let rates = standard_frame_rates();
        let min_rate = rates[0];
        let max_rate = rates[rates.len() - 1];
        let max_duration = GIF_DELAY_STEP_MS * (100.0 / min_rate).ceil() as u32;
        let min_duration = GIF_DELAY_STEP_MS * (100.0 / max_rate).floor() as u32;

        let candidates: Vec<DurationEntry> = (min_duration..=max_duration)
            .step_by(GIF_DELAY_STEP_MS as usize)
            .map(DurationEntry::new)
            .collect();

        let entries = rates
            .iter()
            .map(|&rate| nearest(&candidates, |c| (c.frame_rate - rate).abs()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[DurationEntry] {
        &self.entries
    }

    pub fn by_duration(&self, duration_in_msec: u32) -> DurationEntry {
        nearest(&self.entries, |e| {
            (e.duration_in_msec as f64 - duration_in_msec as f64).abs()
        })
    }

    pub fn by_frame_rate(&self, frame_rate: f64) -> DurationEntry {
        nearest(&self.entries, |e| (e.frame_rate - frame_rate).abs())
    }

    /// Entry closest to the film rate (40 ms).
    pub fn default_entry(&self) -> DurationEntry {
        self.by_frame_rate(FILM_FRAME_RATE)
    }

    /// Shortest duration; used when a loaded GIF carries no delays.
    pub fn fallback_entry(&self) -> DurationEntry {
        self.entries[self.entries.len() - 1]
    }
}

pub static GIF_DURATION_MAP: LazyLock<DurationMap> = LazyLock::new(DurationMap::build);
