use super::{ImageLayer, ModelError, affected_layers};
use crate::cache_graph::{DependencyGraph, NodeId};
use crate::imaging::{
    ImageValue, ResizeSpec, make_disabled_image, overlay_nime_name, resize_contain, resize_cover,
};
use crate::naming::{current_time_stamp, is_valid_timestamp};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

/// Observer callback fired after an edit session changed a layer.
pub type NotifyHandler = Box<dyn FnMut() + Send>;

fn cover(image: &ImageValue, spec: &ResizeSpec) -> ImageValue {
    resize_cover(image, spec)
}

fn contain(image: &ImageValue, spec: &ResizeSpec) -> ImageValue {
    resize_contain(image, spec)
}

/// Name drawn on NIME renditions; `None` leaves them bare.
type OverlayText = Arc<RwLock<Option<String>>>;

/// One still image and its cached renditions.
pub struct ImageModel {
    graph: DependencyGraph<ImageValue, ResizeSpec>,
    raw: NodeId,
    nime: NodeId,
    preview: NodeId,
    thumb_enabled: NodeId,
    thumb_disabled: NodeId,
    nime_name: Option<String>,
    overlay_nime_name: bool,
    overlay_text: OverlayText,
    time_stamp: String,
    enable: bool,
    raw_changed_at: SystemTime,
    handlers: HashMap<ImageLayer, Vec<NotifyHandler>>,
}

impl Default for ImageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ImageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageModel")
            .field("raw", &self.raw_image())
            .field("nime_name", &self.nime_name)
            .field("overlay_nime_name", &self.overlay_nime_name)
            .field("time_stamp", &self.time_stamp)
            .field("enable", &self.enable)
            .finish_non_exhaustive()
    }
}

impl ImageModel {
    /// Empty model: no image, fresh timestamp, enabled, all sizes RAW.
    pub fn new() -> Self {
        let mut graph: DependencyGraph<ImageValue, ResizeSpec> = DependencyGraph::new();
        let raw = graph.add_source(ResizeSpec::raw());
        let overlay_text = OverlayText::default();
        let nime_overlay = Arc::clone(&overlay_text);
        let nime = graph.add_derived(
            raw,
            ResizeSpec::raw(),
            cover,
            Some(Box::new(move |img: ImageValue| {
                let text = nime_overlay.read().unwrap_or_else(PoisonError::into_inner);
                match text.as_deref() {
                    Some(name) => overlay_nime_name(&img, name),
                    None => img,
                }
            })),
        );
        let preview = graph.add_derived(nime, ResizeSpec::raw(), contain, None);
        let thumb_enabled = graph.add_derived(nime, ResizeSpec::raw(), cover, None);
        let thumb_disabled = graph.add_derived(
            thumb_enabled,
            ResizeSpec::raw(),
            cover,
            Some(Box::new(|img: ImageValue| make_disabled_image(&img))),
        );
        Self {
            graph,
            raw,
            nime,
            preview,
            thumb_enabled,
            thumb_disabled,
            nime_name: None,
            overlay_nime_name: false,
            overlay_text,
            time_stamp: current_time_stamp(),
            enable: true,
            raw_changed_at: SystemTime::now(),
            handlers: HashMap::new(),
        }
    }

    /// Model around an existing image.
    ///
    /// `time_stamp` of `None` generates one; an invalid string is an error.
    pub fn with_raw(
        raw: Option<ImageValue>,
        nime_name: Option<String>,
        time_stamp: Option<&str>,
        enable: bool,
    ) -> Result<Self, ModelError> {
        let mut model = Self::new();
        model.edit(|s| {
            s.set_raw_image(raw);
            s.set_nime_name(nime_name);
            s.set_time_stamp(time_stamp)?;
            s.set_enable(enable);
            Ok(())
        })?;
        Ok(model)
    }

    pub fn nime_name(&self) -> Option<&str> {
        self.nime_name.as_deref()
    }

    /// Whether NIME renditions carry the name overlay.
    pub fn overlay_nime_name(&self) -> bool {
        self.overlay_nime_name
    }

    pub fn time_stamp(&self) -> &str {
        &self.time_stamp
    }

    pub fn enable(&self) -> bool {
        self.enable
    }

    /// When the RAW image last changed. Models loaded from disk report the
    /// epoch so their RAW files are never rewritten needlessly.
    pub fn raw_changed_at(&self) -> SystemTime {
        self.raw_changed_at
    }

    pub(crate) fn set_raw_changed_at(&mut self, at: SystemTime) {
        self.raw_changed_at = at;
    }

    /// The RAW image as set, without resolving anything.
    pub fn raw_image(&self) -> Option<&ImageValue> {
        self.graph.peek(self.raw)
    }

    fn node(&self, layer: ImageLayer) -> NodeId {
        match layer {
            ImageLayer::Raw => self.raw,
            ImageLayer::Nime => self.nime,
            ImageLayer::Preview => self.preview,
            ImageLayer::Thumbnail if self.enable => self.thumb_enabled,
            ImageLayer::Thumbnail => self.thumb_disabled,
        }
    }

    /// Rendition for `layer`, recomputed if stale. `None` while no RAW image is set.
    pub fn get_image(&mut self, layer: ImageLayer) -> Option<ImageValue> {
        let node = self.node(layer);
        self.graph.output(node)
    }

    pub fn get_size(&self, layer: ImageLayer) -> Result<ResizeSpec, ModelError> {
        match layer {
            ImageLayer::Raw => Err(ModelError::RawNotResizable),
            ImageLayer::Thumbnail => Ok(*self.graph.param(self.thumb_enabled)),
            other => Ok(*self.graph.param(self.node(other))),
        }
    }

    /// Whether reading `layer` would recompute.
    pub fn is_layer_dirty(&self, layer: ImageLayer) -> bool {
        match layer {
            ImageLayer::Thumbnail => {
                self.graph.is_dirty(self.thumb_enabled) || self.graph.is_dirty(self.thumb_disabled)
            }
            other => self.graph.is_dirty(self.node(other)),
        }
    }

    /// Number of recomputations of the node currently serving `layer`.
    pub fn recompute_count(&self, layer: ImageLayer) -> u64 {
        self.graph.recompute_count(self.node(layer))
    }

    pub fn register_notify_handler(
        &mut self,
        layer: ImageLayer,
        handler: impl FnMut() + Send + 'static,
    ) {
        self.handlers
            .entry(layer)
            .or_default()
            .push(Box::new(handler));
    }

    /// Run an edit session. On `Ok`, observers of every changed layer and of
    /// the layers downstream of it are called once, in topological order.
    /// On `Err` nothing is notified; mutations already applied stay.
    pub fn edit<F>(&mut self, f: F) -> Result<(), ModelError>
    where
        F: FnOnce(&mut ImageEditSession<'_>) -> Result<(), ModelError>,
    {
        let changed = self.edit_silent(f)?;
        self.notify(&changed);
        Ok(())
    }

    /// Edit without notifying; returns the directly changed layers.
    pub(crate) fn edit_silent<F>(&mut self, f: F) -> Result<Vec<ImageLayer>, ModelError>
    where
        F: FnOnce(&mut ImageEditSession<'_>) -> Result<(), ModelError>,
    {
        let mut session = ImageEditSession::new(self);
        f(&mut session)?;
        Ok(session.finish())
    }

    pub(crate) fn notify(&mut self, changed: &[ImageLayer]) {
        for layer in affected_layers(changed) {
            if let Some(handlers) = self.handlers.get_mut(&layer) {
                for handler in handlers.iter_mut() {
                    handler();
                }
            }
        }
    }

    /// Point the NIME overlay at the current name and flag. Returns whether
    /// the drawn text changed.
    fn sync_overlay(&mut self) -> bool {
        let wanted = self
            .nime_name
            .clone()
            .filter(|_| self.overlay_nime_name);
        let mut text = self
            .overlay_text
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *text == wanted {
            return false;
        }
        *text = wanted;
        true
    }

    /// Invalidate `layer` without changing any input.
    pub(crate) fn mark_layer_dirty(&mut self, layer: ImageLayer) {
        match layer {
            ImageLayer::Thumbnail => {
                self.graph.mark_dirty(self.thumb_enabled);
                self.graph.mark_dirty(self.thumb_disabled);
            }
            other => {
                let node = self.node(other);
                self.graph.mark_dirty(node);
            }
        }
    }
}

/// Mutating view of an [`ImageModel`], alive for one [`ImageModel::edit`] call.
pub struct ImageEditSession<'a> {
    model: &'a mut ImageModel,
    changed: Vec<ImageLayer>,
    raw_replaced: bool,
    explicit_time_stamp: bool,
}

impl<'a> ImageEditSession<'a> {
    fn new(model: &'a mut ImageModel) -> Self {
        Self {
            model,
            changed: Vec::new(),
            raw_replaced: false,
            explicit_time_stamp: false,
        }
    }

    fn touch(&mut self, layer: ImageLayer) {
        if !self.changed.contains(&layer) {
            self.changed.push(layer);
        }
    }

    fn finish(self) -> Vec<ImageLayer> {
        if self.raw_replaced && !self.explicit_time_stamp {
            self.model.time_stamp = current_time_stamp();
        }
        self.changed
    }

    /// Replace the RAW image. Unless this session also sets a timestamp, a
    /// new one is generated when the session ends, even if `raw` is the
    /// image already held.
    pub fn set_raw_image(&mut self, raw: Option<ImageValue>) -> &mut Self {
        self.raw_replaced = true;
        if self.model.graph.set_source(self.model.raw, raw) {
            self.model.raw_changed_at = SystemTime::now();
            self.touch(ImageLayer::Raw);
        }
        self
    }

    /// Set a timestamp; `None` generates one from the current time.
    pub fn set_time_stamp(&mut self, time_stamp: Option<&str>) -> Result<&mut Self, ModelError> {
        let value = match time_stamp {
            Some(ts) if is_valid_timestamp(ts) => ts.to_string(),
            Some(ts) => return Err(ModelError::InvalidTimestamp(ts.to_string())),
            None => current_time_stamp(),
        };
        self.model.time_stamp = value;
        self.explicit_time_stamp = true;
        Ok(self)
    }

    pub fn set_nime_name(&mut self, nime_name: Option<String>) -> &mut Self {
        if self.model.nime_name != nime_name {
            self.model.nime_name = nime_name;
            if self.model.sync_overlay() {
                self.model.graph.mark_dirty(self.model.nime);
                self.touch(ImageLayer::Nime);
            }
        }
        self
    }

    /// Draw the NIME name over NIME renditions and everything derived from them.
    pub fn set_overlay_nime_name(&mut self, overlay: bool) -> &mut Self {
        if self.model.overlay_nime_name != overlay {
            self.model.overlay_nime_name = overlay;
            if self.model.sync_overlay() {
                self.model.graph.mark_dirty(self.model.nime);
                self.touch(ImageLayer::Nime);
            }
        }
        self
    }

    pub fn set_enable(&mut self, enable: bool) -> &mut Self {
        if self.model.enable != enable {
            self.model.enable = enable;
            self.model.mark_layer_dirty(ImageLayer::Thumbnail);
            self.touch(ImageLayer::Thumbnail);
        }
        self
    }

    pub fn set_size(&mut self, layer: ImageLayer, spec: ResizeSpec) -> Result<&mut Self, ModelError> {
        let node = match layer {
            ImageLayer::Raw => return Err(ModelError::RawNotResizable),
            ImageLayer::Nime => self.model.nime,
            ImageLayer::Preview => self.model.preview,
            ImageLayer::Thumbnail => self.model.thumb_enabled,
        };
        if self.model.graph.set_parameter(node, spec) {
            self.touch(layer);
        }
        Ok(self)
    }

    /// Copy image, name, overlay flag, timestamp, enable flag and sizes from `other`.
    pub fn set_model(&mut self, other: &ImageModel) -> Result<&mut Self, ModelError> {
        self.set_raw_image(other.raw_image().cloned());
        self.set_nime_name(other.nime_name.clone());
        self.set_overlay_nime_name(other.overlay_nime_name);
        self.set_time_stamp(Some(&other.time_stamp))?;
        self.set_enable(other.enable);
        for layer in [ImageLayer::Nime, ImageLayer::Preview, ImageLayer::Thumbnail] {
            self.set_size(layer, other.get_size(layer)?)?;
        }
        Ok(self)
    }

    /// Force a change notification for `layer` and everything below it.
    pub(crate) fn touch_layer(&mut self, layer: ImageLayer) -> &mut Self {
        self.model.mark_layer_dirty(layer);
        self.touch(layer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{AspectRatioPattern, ResolutionPattern};
    use crate::test_helpers::{gradient_image, notify_counter, solid_image};
    use std::sync::atomic::Ordering;

    fn square_128() -> ResizeSpec {
        ResizeSpec::from_patterns(AspectRatioPattern::Square, ResolutionPattern::W128).unwrap()
    }

    fn model_with_image() -> ImageModel {
        ImageModel::with_raw(Some(gradient_image(320, 180)), None, None, true).unwrap()
    }

    // =========================================================================
    // rendition tests
    // =========================================================================

    #[test]
    fn empty_model_has_no_images() {
        let mut model = ImageModel::new();
        for layer in ImageLayer::ALL {
            assert_eq!(model.get_image(layer), None);
        }
        assert!(is_valid_timestamp(model.time_stamp()));
        assert!(model.enable());
    }

    #[test]
    fn raw_layer_returns_source_instance() {
        let img = gradient_image(10, 10);
        let mut model = ImageModel::with_raw(Some(img.clone()), None, None, true).unwrap();
        assert_eq!(model.get_image(ImageLayer::Raw), Some(img));
    }

    #[test]
    fn layers_follow_their_sizes() {
        let mut model = model_with_image();
        model
            .edit(|s| {
                s.set_size(ImageLayer::Nime, square_128())?;
                s.set_size(ImageLayer::Preview, ResizeSpec::exact(64, 32)?)?;
                s.set_size(ImageLayer::Thumbnail, ResizeSpec::exact(16, 16)?)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(model.get_image(ImageLayer::Nime).unwrap().dimensions(), (128, 128));
        assert_eq!(model.get_image(ImageLayer::Preview).unwrap().dimensions(), (32, 32));
        assert_eq!(model.get_image(ImageLayer::Thumbnail).unwrap().dimensions(), (16, 16));
    }

    #[test]
    fn repeated_reads_do_not_recompute() {
        let mut model = model_with_image();
        let first = model.get_image(ImageLayer::Preview).unwrap();
        let second = model.get_image(ImageLayer::Preview).unwrap();
        assert_eq!(first, second);
        assert_eq!(model.recompute_count(ImageLayer::Preview), 1);
    }

    #[test]
    fn preview_resize_leaves_thumbnail_cached() {
        let mut model = model_with_image();
        let thumb = model.get_image(ImageLayer::Thumbnail).unwrap();
        model.get_image(ImageLayer::Preview);
        model
            .edit(|s| {
                s.set_size(ImageLayer::Preview, ResizeSpec::exact(50, 50)?)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(model.get_image(ImageLayer::Thumbnail).unwrap(), thumb);
        assert_eq!(model.recompute_count(ImageLayer::Nime), 1);
    }

    #[test]
    fn disabled_thumbnail_is_a_different_rendition() {
        let mut model = model_with_image();
        let enabled = model.get_image(ImageLayer::Thumbnail).unwrap();
        model
            .edit(|s| {
                s.set_enable(false);
                Ok(())
            })
            .unwrap();
        let disabled = model.get_image(ImageLayer::Thumbnail).unwrap();
        assert_ne!(enabled, disabled);
        assert_eq!(enabled.dimensions(), disabled.dimensions());
    }

    #[test]
    fn raw_size_is_rejected() {
        let mut model = model_with_image();
        assert!(matches!(
            model.get_size(ImageLayer::Raw),
            Err(ModelError::RawNotResizable)
        ));
        let result = model.edit(|s| {
            s.set_size(ImageLayer::Raw, ResizeSpec::raw())?;
            Ok(())
        });
        assert!(matches!(result, Err(ModelError::RawNotResizable)));
    }

    // =========================================================================
    // timestamp tests
    // =========================================================================

    #[test]
    fn explicit_timestamp_is_kept() {
        let model = ImageModel::with_raw(
            Some(gradient_image(4, 4)),
            None,
            Some("2024-01-02_03-04-05_678"),
            true,
        )
        .unwrap();
        assert_eq!(model.time_stamp(), "2024-01-02_03-04-05_678");
    }

    #[test]
    fn invalid_timestamp_is_an_error() {
        let result = ImageModel::with_raw(None, None, Some("yesterday"), true);
        assert!(matches!(result, Err(ModelError::InvalidTimestamp(_))));
    }

    #[test]
    fn new_raw_image_regenerates_timestamp() {
        let mut model =
            ImageModel::with_raw(None, None, Some("2000-01-01_00-00-00_000"), true).unwrap();
        model
            .edit(|s| {
                s.set_raw_image(Some(gradient_image(4, 4)));
                Ok(())
            })
            .unwrap();
        assert_ne!(model.time_stamp(), "2000-01-01_00-00-00_000");
        assert!(is_valid_timestamp(model.time_stamp()));
    }

    #[test]
    fn setting_the_same_raw_image_still_regenerates_timestamp() {
        let img = gradient_image(4, 4);
        let mut model = ImageModel::with_raw(
            Some(img.clone()),
            None,
            Some("2000-01-01_00-00-00_000"),
            true,
        )
        .unwrap();
        let raw = notify_counter(&mut model, ImageLayer::Raw);
        model
            .edit(|s| {
                s.set_raw_image(Some(img));
                Ok(())
            })
            .unwrap();
        assert_ne!(model.time_stamp(), "2000-01-01_00-00-00_000");
        assert!(is_valid_timestamp(model.time_stamp()));
        // Same pixels: nothing to re-render.
        assert_eq!(raw.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // name overlay tests
    // =========================================================================

    fn named_model(overlay: bool) -> ImageModel {
        let mut model = ImageModel::with_raw(
            Some(solid_image(480, 240, 200)),
            Some("<NIME>Some Show".into()),
            None,
            true,
        )
        .unwrap();
        model
            .edit(|s| {
                s.set_overlay_nime_name(overlay);
                Ok(())
            })
            .unwrap();
        model
    }

    #[test]
    fn overlay_flag_draws_name_on_nime() {
        let mut bare = named_model(false);
        let mut tagged = named_model(true);
        let bare_nime = bare.get_image(ImageLayer::Nime).unwrap();
        let tagged_nime = tagged.get_image(ImageLayer::Nime).unwrap();
        assert_eq!(bare_nime.rgb8(), solid_image(480, 240, 200).rgb8());
        assert_ne!(tagged_nime.rgb8(), bare_nime.rgb8());
        assert_ne!(
            tagged.get_image(ImageLayer::Preview).unwrap().rgb8(),
            bare.get_image(ImageLayer::Preview).unwrap().rgb8()
        );
        assert!(tagged.overlay_nime_name());
    }

    #[test]
    fn overlay_follows_name_changes() {
        let mut model = named_model(true);
        let tagged = model.get_image(ImageLayer::Nime).unwrap();
        let nime = notify_counter(&mut model, ImageLayer::Nime);
        model
            .edit(|s| {
                s.set_nime_name(None);
                Ok(())
            })
            .unwrap();
        assert_eq!(nime.load(Ordering::SeqCst), 1);
        let bare = model.get_image(ImageLayer::Nime).unwrap();
        assert_ne!(bare.rgb8(), tagged.rgb8());
        assert_eq!(bare.rgb8(), solid_image(480, 240, 200).rgb8());
    }

    #[test]
    fn name_change_without_overlay_keeps_nime_cached() {
        let mut model = named_model(false);
        model.get_image(ImageLayer::Nime);
        let nime = notify_counter(&mut model, ImageLayer::Nime);
        model
            .edit(|s| {
                s.set_nime_name(Some("<NIME>Other".into()));
                Ok(())
            })
            .unwrap();
        assert_eq!(nime.load(Ordering::SeqCst), 0);
        assert_eq!(model.recompute_count(ImageLayer::Nime), 1);
    }

    // =========================================================================
    // notification tests
    // =========================================================================

    #[test]
    fn raw_change_notifies_every_layer_once() {
        let mut model = ImageModel::new();
        let counters: Vec<_> = ImageLayer::ALL
            .iter()
            .map(|&layer| notify_counter(&mut model, layer))
            .collect();
        model
            .edit(|s| {
                s.set_raw_image(Some(gradient_image(8, 8)));
                s.set_size(ImageLayer::Preview, ResizeSpec::exact(4, 4)?)?;
                Ok(())
            })
            .unwrap();
        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn preview_size_change_notifies_preview_only() {
        let mut model = model_with_image();
        let raw = notify_counter(&mut model, ImageLayer::Raw);
        let preview = notify_counter(&mut model, ImageLayer::Preview);
        let thumb = notify_counter(&mut model, ImageLayer::Thumbnail);
        model
            .edit(|s| {
                s.set_size(ImageLayer::Preview, ResizeSpec::exact(30, 30)?)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(raw.load(Ordering::SeqCst), 0);
        assert_eq!(preview.load(Ordering::SeqCst), 1);
        assert_eq!(thumb.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn enable_change_notifies_thumbnail() {
        let mut model = model_with_image();
        let thumb = notify_counter(&mut model, ImageLayer::Thumbnail);
        let nime = notify_counter(&mut model, ImageLayer::Nime);
        model
            .edit(|s| {
                s.set_enable(false);
                Ok(())
            })
            .unwrap();
        assert_eq!(thumb.load(Ordering::SeqCst), 1);
        assert_eq!(nime.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_op_edit_notifies_nothing() {
        let mut model = model_with_image();
        let raw = notify_counter(&mut model, ImageLayer::Raw);
        model
            .edit(|s| {
                s.set_enable(true);
                s.set_size(ImageLayer::Nime, ResizeSpec::raw())?;
                Ok(())
            })
            .unwrap();
        assert_eq!(raw.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_edit_notifies_nothing_but_keeps_changes() {
        let mut model = model_with_image();
        let preview = notify_counter(&mut model, ImageLayer::Preview);
        let result = model.edit(|s| {
            s.set_size(ImageLayer::Preview, ResizeSpec::exact(20, 20)?)?;
            s.set_time_stamp(Some("bad"))?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(preview.load(Ordering::SeqCst), 0);
        assert_eq!(
            model.get_size(ImageLayer::Preview).unwrap(),
            ResizeSpec::exact(20, 20).unwrap()
        );
    }

    // =========================================================================
    // set_model tests
    // =========================================================================

    #[test]
    fn set_model_copies_everything() {
        let mut source = ImageModel::with_raw(
            Some(gradient_image(40, 40)),
            Some("<NIME>Show".into()),
            Some("2024-01-02_03-04-05_678"),
            false,
        )
        .unwrap();
        source
            .edit(|s| {
                s.set_overlay_nime_name(true);
                s.set_size(ImageLayer::Nime, square_128())?;
                Ok(())
            })
            .unwrap();

        let mut copy = ImageModel::new();
        copy.edit(|s| {
            s.set_model(&source)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(copy.raw_image(), source.raw_image());
        assert_eq!(copy.nime_name(), Some("<NIME>Show"));
        assert!(copy.overlay_nime_name());
        assert_eq!(copy.time_stamp(), "2024-01-02_03-04-05_678");
        assert!(!copy.enable());
        assert_eq!(copy.get_size(ImageLayer::Nime).unwrap(), square_128());
    }
}
