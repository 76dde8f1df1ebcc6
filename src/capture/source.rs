use std::fmt;

use crate::imaging::ImageValue;

use super::CaptureError;

/// Opaque handle of a capturable window or monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub id: TargetId,
    pub name: String,
}

/// Platform capture backend.
///
/// A source grabs one frame per call and keeps no history; buffering is the
/// session's job.
pub trait ScreenSource: Send {
    fn enumerate_targets(&self) -> Vec<CaptureTarget>;

    /// Grab the current content of `target`. `Ok(None)` means no new frame
    /// is available yet.
    fn capture(&mut self, target: &TargetId) -> Result<Option<ImageValue>, CaptureError>;

    /// Free platform resources. A released source may be captured again.
    fn release(&mut self);
}

/// Source that produces black frames of a fixed size for a single target.
#[derive(Debug, Clone)]
pub struct BlankSource {
    width: u32,
    height: u32,
}

impl BlankSource {
    pub const TARGET: TargetId = TargetId(0);

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for BlankSource {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl ScreenSource for BlankSource {
    fn enumerate_targets(&self) -> Vec<CaptureTarget> {
        vec![CaptureTarget {
            id: Self::TARGET,
            name: "Blank screen".to_string(),
        }]
    }

    fn capture(&mut self, target: &TargetId) -> Result<Option<ImageValue>, CaptureError> {
        if *target != Self::TARGET {
            return Err(CaptureError::Source(format!("unknown target {target}")));
        }
        Ok(Some(ImageValue::empty(self.width, self.height)))
    }

    fn release(&mut self) {}
}

/// Which capture backend a [`SourceSlot`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Built-in [`BlankSource`].
    Blank,
    /// Backend supplied by the embedding application.
    Platform,
}

type SourceBuilder = Box<dyn FnMut(BackendKind) -> Result<Box<dyn ScreenSource>, CaptureError> + Send>;

/// Holds the active capture backend and switches between backends.
///
/// Switching is an explicit transition: the current source is released
/// before the builder constructs the next one, so two backends never hold
/// platform resources at once.
pub struct SourceSlot {
    builder: SourceBuilder,
    active: Option<(BackendKind, Box<dyn ScreenSource>)>,
}

impl fmt::Debug for SourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSlot")
            .field("kind", &self.kind())
            .finish()
    }
}

impl SourceSlot {
    pub fn new(
        builder: impl FnMut(BackendKind) -> Result<Box<dyn ScreenSource>, CaptureError> + Send + 'static,
    ) -> Self {
        Self {
            builder: Box::new(builder),
            active: None,
        }
    }

    /// Slot whose builder only knows [`BackendKind::Blank`].
    pub fn blank_only() -> Self {
        Self::new(|kind| match kind {
            BackendKind::Blank => Ok(Box::new(BlankSource::default()) as Box<dyn ScreenSource>),
            BackendKind::Platform => Err(CaptureError::Source(
                "no platform capture backend registered".into(),
            )),
        })
    }

    pub fn kind(&self) -> Option<BackendKind> {
        self.active.as_ref().map(|(kind, _)| *kind)
    }

    /// Switch to `kind`. Switching to the active kind is a no-op. On builder
    /// failure the slot is left empty.
    pub fn switch(&mut self, kind: BackendKind) -> Result<(), CaptureError> {
        if self.kind() == Some(kind) {
            return Ok(());
        }
        if let Some((old, mut source)) = self.active.take() {
            log::debug!("Releasing capture backend {old:?}");
            source.release();
        }
        let source = (self.builder)(kind)?;
        log::info!("Capture backend switched to {kind:?}");
        self.active = Some((kind, source));
        Ok(())
    }
}

impl ScreenSource for SourceSlot {
    fn enumerate_targets(&self) -> Vec<CaptureTarget> {
        self.active
            .as_ref()
            .map(|(_, source)| source.enumerate_targets())
            .unwrap_or_default()
    }

    fn capture(&mut self, target: &TargetId) -> Result<Option<ImageValue>, CaptureError> {
        match &mut self.active {
            Some((_, source)) => source.capture(target),
            None => Err(CaptureError::Source("no capture backend selected".into())),
        }
    }

    fn release(&mut self) {
        if let Some((_, source)) = &mut self.active {
            source.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Source that records lifecycle events into a shared log.
    struct LoggingSource {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScreenSource for LoggingSource {
        fn enumerate_targets(&self) -> Vec<CaptureTarget> {
            vec![CaptureTarget {
                id: TargetId(7),
                name: self.name.to_string(),
            }]
        }

        fn capture(&mut self, _target: &TargetId) -> Result<Option<ImageValue>, CaptureError> {
            self.log.lock().unwrap().push(format!("capture {}", self.name));
            Ok(Some(ImageValue::empty(4, 4)))
        }

        fn release(&mut self) {
            self.log.lock().unwrap().push(format!("release {}", self.name));
        }
    }

    fn logging_slot() -> (SourceSlot, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let builder_log = Arc::clone(&log);
        let slot = SourceSlot::new(move |kind| {
            let name = match kind {
                BackendKind::Blank => "blank",
                BackendKind::Platform => "platform",
            };
            builder_log.lock().unwrap().push(format!("build {name}"));
            Ok(Box::new(LoggingSource {
                name,
                log: Arc::clone(&builder_log),
            }) as Box<dyn ScreenSource>)
        });
        (slot, log)
    }

    #[test]
    fn blank_source_yields_frames_of_its_size() {
        let mut source = BlankSource::new(32, 18);
        let frame = source.capture(&BlankSource::TARGET).unwrap().unwrap();
        assert_eq!(frame.dimensions(), (32, 18));
        assert!(source.capture(&TargetId(99)).is_err());
    }

    #[test]
    fn switch_releases_old_before_building_new() {
        let (mut slot, log) = logging_slot();
        slot.switch(BackendKind::Blank).unwrap();
        slot.switch(BackendKind::Platform).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["build blank", "release blank", "build platform"]
        );
        assert_eq!(slot.kind(), Some(BackendKind::Platform));
    }

    #[test]
    fn switch_to_same_kind_is_noop() {
        let (mut slot, log) = logging_slot();
        slot.switch(BackendKind::Blank).unwrap();
        slot.switch(BackendKind::Blank).unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_slot_cannot_capture() {
        let mut slot = SourceSlot::blank_only();
        assert!(slot.enumerate_targets().is_empty());
        assert!(matches!(
            slot.capture(&BlankSource::TARGET),
            Err(CaptureError::Source(_))
        ));
    }

    #[test]
    fn failed_switch_leaves_slot_empty() {
        let mut slot = SourceSlot::blank_only();
        slot.switch(BackendKind::Blank).unwrap();
        assert!(slot.switch(BackendKind::Platform).is_err());
        assert_eq!(slot.kind(), None);
    }

    #[test]
    fn slot_delegates_to_active_source() {
        let mut slot = SourceSlot::blank_only();
        slot.switch(BackendKind::Blank).unwrap();
        assert_eq!(slot.enumerate_targets()[0].id, BlankSource::TARGET);
        assert!(slot.capture(&BlankSource::TARGET).unwrap().is_some());
    }
}
