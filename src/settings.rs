//! Persistent user settings with debounced writes.
//!
//! Settings live in a flat JSON object on disk. Reads and writes go to the
//! in-memory copy; a single writer thread flushes it to disk once no `set`
//! has happened for the debounce interval, so a burst of changes (a slider
//! being dragged) costs one write.
//!
//! ```text
//! set ──▶ deadline = now + debounce
//! writer (every poll_interval): deadline passed? ──▶ snapshot ──▶ write file
//! close ──▶ deadline = now, stop ──▶ writer flushes, acknowledges, exits
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::SettingsConfig;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("value for {key:?} is not representable as JSON: {reason}")]
    NotSerializable { key: String, reason: String },
}

#[derive(Debug, Default)]
struct State {
    properties: Map<String, Value>,
    deadline: Option<Instant>,
    stop: bool,
}

#[derive(Debug)]
pub struct Settings {
    path: PathBuf,
    state: Arc<Mutex<State>>,
    debounce: Duration,
    close_timeout: Duration,
    ack: Receiver<()>,
    writer: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read the settings object. A missing file is an empty object; an
/// unreadable one is logged and treated as empty.
fn load_properties(path: &Path) -> Map<String, Value> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            log::error!("Failed to read settings from {}: {e}", path.display());
            return Map::new();
        }
    };
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            log::error!("Settings file {} is not a JSON object", path.display());
            Map::new()
        }
        Err(e) => {
            log::error!("Failed to parse settings from {}: {e}", path.display());
            Map::new()
        }
    }
}

fn write_properties(path: &Path, properties: Map<String, Value>) {
    let result = serde_json::to_string(&Value::Object(properties))
        .map_err(std::io::Error::other)
        .and_then(|text| fs::write(path, text));
    match result {
        Ok(()) => log::debug!("Settings written to {}", path.display()),
        Err(e) => log::error!("Failed to write settings to {}: {e}", path.display()),
    }
}

fn writer_loop(path: PathBuf, state: Arc<Mutex<State>>, poll_interval: Duration, ack: Sender<()>) {
    loop {
        let (snapshot, stop) = {
            let mut state = lock(&state);
            let due = state.deadline.is_some_and(|d| Instant::now() >= d);
            let snapshot = due.then(|| {
                state.deadline = None;
                state.properties.clone()
            });
            (snapshot, state.stop)
        };
        if let Some(properties) = snapshot {
            write_properties(&path, properties);
        }
        if stop {
            // The receiver may already have given up waiting.
            let _ = ack.send(());
            return;
        }
        thread::sleep(poll_interval);
    }
}

impl Settings {
    /// Load `path` and start the writer thread.
    pub fn open(path: impl Into<PathBuf>, config: &SettingsConfig) -> Result<Self, SettingsError> {
        let path = path.into();
        let state = Arc::new(Mutex::new(State {
            properties: load_properties(&path),
            ..State::default()
        }));
        let (ack_tx, ack_rx) = bounded(1);
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        let writer = {
            let path = path.clone();
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name("settings-writer".into())
                .spawn(move || writer_loop(path, state, poll_interval, ack_tx))?
        };
        Ok(Self {
            path,
            state,
            debounce: Duration::from_secs_f64(config.debounce_secs),
            close_timeout: Duration::from_secs_f64(config.close_timeout_secs),
            ack: ack_rx,
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored value for `key`. A missing key stores and returns `default`;
    /// a value of the wrong shape is logged and `default` returned.
    pub fn get<T: Serialize + DeserializeOwned>(&self, key: &str, default: T) -> T {
        let mut state = lock(&self.state);
        match state.properties.get(key) {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("Setting {key:?} has unexpected value {value}: {e}");
                    default
                }
            },
            None => {
                if let Ok(value) = serde_json::to_value(&default) {
                    state.properties.insert(key.to_string(), value);
                }
                default
            }
        }
    }

    /// Store `value` and push the write deadline out by the debounce interval.
    ///
    /// The value must survive a JSON round trip, which rules out non-string
    /// map keys and non-finite floats (JSON writes those as `null`).
    pub fn set<T: Serialize + DeserializeOwned>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let not_serializable = |reason: String| SettingsError::NotSerializable {
            key: key.to_string(),
            reason,
        };
        let json = serde_json::to_value(value).map_err(|e| not_serializable(e.to_string()))?;
        serde_json::from_value::<T>(json.clone()).map_err(|e| not_serializable(e.to_string()))?;

        let mut state = lock(&self.state);
        state.properties.insert(key.to_string(), json);
        state.deadline = Some(Instant::now() + self.debounce);
        Ok(())
    }

    /// Flush pending changes and stop the writer, waiting at most the close
    /// timeout. Idempotent.
    pub fn close(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        {
            let mut state = lock(&self.state);
            state.deadline = Some(Instant::now());
            state.stop = true;
        }
        match self.ack.recv_timeout(self.close_timeout) {
            Ok(()) => {
                if writer.join().is_err() {
                    log::error!("Settings writer thread panicked");
                }
            }
            Err(_) => log::warn!(
                "Settings writer did not stop within {:?}; pending changes may be lost",
                self.close_timeout
            ),
        }
    }
}

impl Drop for Settings {
    fn drop(&mut self) {
        self.close();
    }
}
