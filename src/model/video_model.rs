use super::duration::GIF_DURATION_MAP;
use super::image_model::{ImageEditSession, ImageModel};
use super::{ImageLayer, ModelError};
use crate::imaging::{ImageValue, ResizeSpec, analysis_image, ssim};
use log::debug;
use rayon::prelude::*;
use std::fmt;
use std::time::SystemTime;

/// Callback fired with the new frame duration after it changed.
pub type DurationHandler = Box<dyn FnMut(u32) + Send>;

const RESIZABLE: [ImageLayer; 3] = [ImageLayer::Nime, ImageLayer::Preview, ImageLayer::Thumbnail];

/// Ordered frames plus a global model that carries the shared settings
/// (sizes, name, timestamp) and broadcasts change notifications.
pub struct VideoModel {
    global: ImageModel,
    frames: Vec<ImageModel>,
    duration_in_msec: u32,
    duration_handlers: Vec<DurationHandler>,
    raw_changed_at: SystemTime,
}

impl Default for VideoModel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VideoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoModel")
            .field("frames", &self.frames.len())
            .field("enabled", &self.num_enable_frames())
            .field("time_stamp", &self.time_stamp())
            .field("duration_in_msec", &self.duration_in_msec)
            .finish_non_exhaustive()
    }
}

impl VideoModel {
    pub fn new() -> Self {
        Self {
            global: ImageModel::new(),
            frames: Vec::new(),
            duration_in_msec: GIF_DURATION_MAP.default_entry().duration_in_msec,
            duration_handlers: Vec::new(),
            raw_changed_at: SystemTime::now(),
        }
    }

    pub fn nime_name(&self) -> Option<&str> {
        self.global.nime_name()
    }

    pub fn overlay_nime_name(&self) -> bool {
        self.global.overlay_nime_name()
    }

    pub fn time_stamp(&self) -> &str {
        self.global.time_stamp()
    }

    pub fn duration_in_msec(&self) -> u32 {
        self.duration_in_msec
    }

    /// When the frame list (images, order or enable flags) last changed.
    pub fn raw_changed_at(&self) -> SystemTime {
        self.raw_changed_at
    }

    pub(crate) fn set_raw_changed_at(&mut self, at: SystemTime) {
        self.raw_changed_at = at;
    }

    pub fn num_total_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn num_enable_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.enable()).count()
    }

    fn check_index(&self, index: usize) -> Result<(), ModelError> {
        if index < self.frames.len() {
            Ok(())
        } else {
            Err(ModelError::FrameIndex {
                index,
                len: self.frames.len(),
            })
        }
    }

    pub fn get_enable(&self, index: usize) -> Result<bool, ModelError> {
        self.check_index(index)?;
        Ok(self.frames[index].enable())
    }

    pub fn get_size(&self, layer: ImageLayer) -> Result<ResizeSpec, ModelError> {
        self.global.get_size(layer)
    }

    /// Rendition of one frame; indices count disabled frames too.
    pub fn get_frame(
        &mut self,
        layer: ImageLayer,
        index: usize,
    ) -> Result<Option<ImageValue>, ModelError> {
        self.check_index(index)?;
        Ok(self.frames[index].get_image(layer))
    }

    pub fn frame(&self, index: usize) -> Option<&ImageModel> {
        self.frames.get(index)
    }

    /// Lazily resolve `layer` for every frame (only enabled ones when
    /// `enabled_only`). Call again to restart.
    pub fn iter_frames(
        &mut self,
        layer: ImageLayer,
        enabled_only: bool,
    ) -> impl Iterator<Item = ImageValue> + '_ {
        self.frames
            .iter_mut()
            .filter(move |f| !enabled_only || f.enable())
            .filter_map(move |f| f.get_image(layer))
    }

    /// Enable flag of every frame, in order.
    pub fn enable_flags(&self) -> Vec<bool> {
        self.frames.iter().map(|f| f.enable()).collect()
    }

    pub fn register_notify_handler(
        &mut self,
        layer: ImageLayer,
        handler: impl FnMut() + Send + 'static,
    ) {
        self.global.register_notify_handler(layer, handler);
    }

    pub fn register_duration_change_handler(&mut self, handler: impl FnMut(u32) + Send + 'static) {
        self.duration_handlers.push(Box::new(handler));
    }

    /// Run an edit session; on `Ok` observers are notified once through the
    /// global model, then duration handlers if the duration changed.
    pub fn edit<F>(&mut self, f: F) -> Result<(), ModelError>
    where
        F: FnOnce(&mut VideoEditSession<'_>) -> Result<(), ModelError>,
    {
        let mut session = VideoEditSession {
            model: self,
            changed: Vec::new(),
            duration_changed: false,
        };
        f(&mut session)?;
        let VideoEditSession {
            changed,
            duration_changed,
            ..
        } = session;

        self.global.notify(&changed);
        if duration_changed {
            let duration = self.duration_in_msec;
            for handler in self.duration_handlers.iter_mut() {
                handler(duration);
            }
        }
        Ok(())
    }

    /// Disable frames that look like their nearest enabled predecessor.
    ///
    /// NIME renditions are downscaled to `analysis_edge` in parallel, compared
    /// with SSIM, and the resulting flags applied in one batch. Returns the
    /// number of frames left disabled.
    pub fn disable_duplicate_frames(
        &mut self,
        threshold: f64,
        analysis_edge: u32,
    ) -> Result<usize, ModelError> {
        let nime: Vec<Option<ImageValue>> = (0..self.frames.len())
            .map(|i| self.frames[i].get_image(ImageLayer::Nime))
            .collect();
        let analysis: Vec<Option<ImageValue>> = nime
            .par_iter()
            .map(|img| img.as_ref().map(|img| analysis_image(img, analysis_edge)))
            .collect();

        let plan = plan_duplicate_frames(analysis.len(), threshold, |a, b| {
            match (&analysis[a], &analysis[b]) {
                (Some(a), Some(b)) => ssim(a, b),
                _ => 0.0,
            }
        });
        let disabled = plan.iter().filter(|e| !**e).count();
        debug!(
            "duplicate pass: {disabled} of {} frames disabled (threshold {threshold})",
            plan.len()
        );

        let batch: Vec<(usize, bool)> = plan.into_iter().enumerate().collect();
        self.edit(|s| {
            s.set_enable_batch(&batch)?;
            Ok(())
        })?;
        Ok(disabled)
    }
}

/// Enable flags after the duplicate pass over `n` frames.
///
/// All frames start enabled. Frame `b` is compared with the nearest frame
/// before it that is still enabled (frame 0 is the fallback) and disabled when
/// `similarity(a, b) > threshold`.
pub fn plan_duplicate_frames(
    n: usize,
    threshold: f64,
    mut similarity: impl FnMut(usize, usize) -> f64,
) -> Vec<bool> {
    let mut enabled = vec![true; n];
    for b in 1..n {
        let mut a = b - 1;
        while a > 0 && !enabled[a] {
            a -= 1;
        }
        if similarity(a, b) > threshold {
            enabled[b] = false;
        }
    }
    enabled
}

/// Mutating view of a [`VideoModel`], alive for one [`VideoModel::edit`] call.
pub struct VideoEditSession<'a> {
    model: &'a mut VideoModel,
    changed: Vec<ImageLayer>,
    duration_changed: bool,
}

impl VideoEditSession<'_> {
    fn edit_global<F>(&mut self, f: F) -> Result<(), ModelError>
    where
        F: FnOnce(&mut ImageEditSession<'_>) -> Result<(), ModelError>,
    {
        for layer in self.model.global.edit_silent(f)? {
            if !self.changed.contains(&layer) {
                self.changed.push(layer);
            }
        }
        Ok(())
    }

    /// Make observers of the whole video see a change at `layer`.
    fn synthetic_change(&mut self, layer: ImageLayer) -> Result<(), ModelError> {
        self.model.raw_changed_at = SystemTime::now();
        self.edit_global(|s| {
            s.touch_layer(layer);
            Ok(())
        })
    }

    /// Bring a new frame in line with the global sizes, name, overlay flag and timestamp.
    fn stamp(&self, frame: &mut ImageModel) -> Result<(), ModelError> {
        let global = &self.model.global;
        let time_stamp = global.time_stamp().to_string();
        let nime_name = global.nime_name().map(str::to_string);
        let overlay = global.overlay_nime_name();
        let sizes = RESIZABLE
            .iter()
            .map(|&layer| Ok((layer, global.get_size(layer)?)))
            .collect::<Result<Vec<_>, ModelError>>()?;
        frame.edit_silent(|s| {
            for (layer, spec) in sizes {
                s.set_size(layer, spec)?;
            }
            s.set_time_stamp(Some(&time_stamp))?;
            s.set_nime_name(nime_name);
            s.set_overlay_nime_name(overlay);
            Ok(())
        })?;
        Ok(())
    }

    /// Insert frames before `position` (`position == len` appends). Each
    /// frame keeps its image and enable flag.
    pub fn insert_frames(
        &mut self,
        frames: Vec<ImageModel>,
        position: usize,
    ) -> Result<&mut Self, ModelError> {
        let len = self.model.frames.len();
        if position > len {
            return Err(ModelError::FrameIndex { index: position, len });
        }
        let mut stamped = Vec::with_capacity(frames.len());
        for mut frame in frames {
            self.stamp(&mut frame)?;
            stamped.push(frame);
        }
        self.model.frames.splice(position..position, stamped);
        self.synthetic_change(ImageLayer::Raw)?;
        Ok(self)
    }

    pub fn append_frames(&mut self, frames: Vec<ImageModel>) -> Result<&mut Self, ModelError> {
        let position = self.model.frames.len();
        self.insert_frames(frames, position)
    }

    /// Append raw captures as enabled frames.
    pub fn append_images(&mut self, images: Vec<ImageValue>) -> Result<&mut Self, ModelError> {
        let frames = images
            .into_iter()
            .map(|img| ImageModel::with_raw(Some(img), None, None, true))
            .collect::<Result<Vec<_>, _>>()?;
        self.append_frames(frames)
    }

    pub fn delete_frame(&mut self, index: usize) -> Result<&mut Self, ModelError> {
        self.model.check_index(index)?;
        self.model.frames.remove(index);
        self.synthetic_change(ImageLayer::Raw)?;
        Ok(self)
    }

    pub fn clear_frames(&mut self) -> Result<&mut Self, ModelError> {
        self.model.frames.clear();
        self.synthetic_change(ImageLayer::Raw)?;
        Ok(self)
    }

    pub fn swap_frames(&mut self, a: usize, b: usize) -> Result<&mut Self, ModelError> {
        self.model.check_index(a)?;
        self.model.check_index(b)?;
        if a != b {
            self.model.frames.swap(a, b);
            self.synthetic_change(ImageLayer::Raw)?;
        }
        Ok(self)
    }

    pub fn set_enable(&mut self, index: usize, enable: bool) -> Result<&mut Self, ModelError> {
        self.set_enable_batch(&[(index, enable)])
    }

    pub fn set_enable_all(&mut self, enable: bool) -> Result<&mut Self, ModelError> {
        let batch: Vec<(usize, bool)> = (0..self.model.frames.len()).map(|i| (i, enable)).collect();
        self.set_enable_batch(&batch)
    }

    /// Apply `(index, enable)` pairs. Indices are validated before anything
    /// changes.
    pub fn set_enable_batch(&mut self, entries: &[(usize, bool)]) -> Result<&mut Self, ModelError> {
        for &(index, _) in entries {
            self.model.check_index(index)?;
        }
        let mut any_change = false;
        for &(index, enable) in entries {
            let frame = &mut self.model.frames[index];
            if frame.enable() != enable {
                frame.edit_silent(|s| {
                    s.set_enable(enable);
                    Ok(())
                })?;
                any_change = true;
            }
        }
        if any_change {
            self.synthetic_change(ImageLayer::Thumbnail)?;
        }
        Ok(self)
    }

    pub fn set_size(&mut self, layer: ImageLayer, spec: ResizeSpec) -> Result<&mut Self, ModelError> {
        if layer == ImageLayer::Raw {
            return Err(ModelError::RawNotResizable);
        }
        for frame in self.model.frames.iter_mut() {
            frame.edit_silent(|s| {
                s.set_size(layer, spec)?;
                Ok(())
            })?;
        }
        self.edit_global(|s| {
            s.set_size(layer, spec)?;
            Ok(())
        })?;
        Ok(self)
    }

    /// Set one timestamp on the video and every frame; `None` generates one.
    pub fn set_time_stamp(&mut self, time_stamp: Option<&str>) -> Result<&mut Self, ModelError> {
        self.edit_global(|s| {
            s.set_time_stamp(time_stamp)?;
            Ok(())
        })?;
        let resolved = self.model.global.time_stamp().to_string();
        for frame in self.model.frames.iter_mut() {
            frame.edit_silent(|s| {
                s.set_time_stamp(Some(&resolved))?;
                Ok(())
            })?;
        }
        Ok(self)
    }

    pub fn set_nime_name(&mut self, nime_name: Option<String>) -> Result<&mut Self, ModelError> {
        for frame in self.model.frames.iter_mut() {
            let name = nime_name.clone();
            frame.edit_silent(|s| {
                s.set_nime_name(name);
                Ok(())
            })?;
        }
        self.edit_global(|s| {
            s.set_nime_name(nime_name);
            Ok(())
        })?;
        Ok(self)
    }

    pub fn set_overlay_nime_name(&mut self, overlay: bool) -> Result<&mut Self, ModelError> {
        for frame in self.model.frames.iter_mut() {
            frame.edit_silent(|s| {
                s.set_overlay_nime_name(overlay);
                Ok(())
            })?;
        }
        self.edit_global(|s| {
            s.set_overlay_nime_name(overlay);
            Ok(())
        })?;
        Ok(self)
    }

    pub fn set_duration_in_msec(&mut self, duration_in_msec: u32) -> &mut Self {
        if self.model.duration_in_msec != duration_in_msec {
            self.model.duration_in_msec = duration_in_msec;
            self.duration_changed = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{AspectRatioPattern, ResolutionPattern};
    use crate::test_helpers::{checker_image, gradient_image, solid_image};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(model: &mut VideoModel, layer: ImageLayer) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        model.register_notify_handler(layer, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn video_with(images: Vec<ImageValue>) -> VideoModel {
        let mut video = VideoModel::new();
        video
            .edit(|s| {
                s.append_images(images)?;
                Ok(())
            })
            .unwrap();
        video
    }

    // =========================================================================
    // frame list tests
    // =========================================================================

    #[test]
    fn append_stamps_global_settings() {
        let mut video = VideoModel::new();
        let spec =
            ResizeSpec::from_patterns(AspectRatioPattern::Square, ResolutionPattern::W128).unwrap();
        video
            .edit(|s| {
                s.set_size(ImageLayer::Nime, spec)?;
                s.set_nime_name(Some("<NIME>Show".into()))?;
                s.set_time_stamp(Some("2024-01-02_03-04-05_678"))?;
                s.append_images(vec![gradient_image(320, 180)])?;
                Ok(())
            })
            .unwrap();

        let frame = video.frame(0).unwrap();
        assert_eq!(frame.get_size(ImageLayer::Nime).unwrap(), spec);
        assert_eq!(frame.nime_name(), Some("<NIME>Show"));
        assert_eq!(frame.time_stamp(), "2024-01-02_03-04-05_678");
        let nime = video.get_frame(ImageLayer::Nime, 0).unwrap().unwrap();
        assert_eq!(nime.dimensions(), (128, 128));
    }

    #[test]
    fn overlay_flag_reaches_every_frame() {
        let mut video = VideoModel::new();
        video
            .edit(|s| {
                s.set_nime_name(Some("<NIME>Show".into()))?;
                s.append_images(vec![solid_image(480, 240, 200)])?;
                s.set_overlay_nime_name(true)?;
                s.append_images(vec![solid_image(480, 240, 200)])?;
                Ok(())
            })
            .unwrap();
        assert!(video.overlay_nime_name());
        for index in 0..2 {
            assert!(video.frame(index).unwrap().overlay_nime_name());
            let nime = video.get_frame(ImageLayer::Nime, index).unwrap().unwrap();
            assert_ne!(nime.rgb8(), solid_image(480, 240, 200).rgb8());
        }
    }

    #[test]
    fn appended_frames_keep_enable_flag() {
        let mut video = VideoModel::new();
        let disabled = ImageModel::with_raw(Some(gradient_image(8, 8)), None, None, false).unwrap();
        video
            .edit(|s| {
                s.append_frames(vec![disabled])?;
                Ok(())
            })
            .unwrap();
        assert!(!video.get_enable(0).unwrap());
        assert_eq!(video.num_enable_frames(), 0);
    }

    #[test]
    fn insert_delete_swap() {
        let a = solid_image(4, 4, 10);
        let b = solid_image(4, 4, 20);
        let c = solid_image(4, 4, 30);
        let mut video = video_with(vec![a.clone(), c.clone()]);
        video
            .edit(|s| {
                s.insert_frames(
                    vec![ImageModel::with_raw(Some(b.clone()), None, None, true)?],
                    1,
                )?;
                Ok(())
            })
            .unwrap();
        let raws: Vec<_> = video.iter_frames(ImageLayer::Raw, false).collect();
        assert_eq!(raws, vec![a.clone(), b.clone(), c.clone()]);

        video
            .edit(|s| {
                s.swap_frames(0, 2)?;
                s.delete_frame(1)?;
                Ok(())
            })
            .unwrap();
        let raws: Vec<_> = video.iter_frames(ImageLayer::Raw, false).collect();
        assert_eq!(raws, vec![c, a]);
    }

    #[test]
    fn out_of_range_indices_are_errors() {
        let mut video = video_with(vec![gradient_image(4, 4)]);
        assert!(matches!(
            video.get_enable(3),
            Err(ModelError::FrameIndex { index: 3, len: 1 })
        ));
        let result = video.edit(|s| {
            s.delete_frame(1)?;
            Ok(())
        });
        assert!(matches!(result, Err(ModelError::FrameIndex { .. })));
        let result = video.edit(|s| {
            s.insert_frames(Vec::new(), 5)?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn iter_frames_skips_disabled_and_restarts() {
        let mut video = video_with(vec![
            gradient_image(4, 4),
            gradient_image(4, 4),
            gradient_image(4, 4),
        ]);
        video
            .edit(|s| {
                s.set_enable(1, false)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(video.iter_frames(ImageLayer::Nime, true).count(), 2);
        assert_eq!(video.iter_frames(ImageLayer::Nime, false).count(), 3);
        assert_eq!(video.iter_frames(ImageLayer::Nime, true).count(), 2);
    }

    #[test]
    fn set_enable_all_and_batch() {
        let mut video = video_with(vec![gradient_image(4, 4); 4]);
        video
            .edit(|s| {
                s.set_enable_all(false)?;
                s.set_enable_batch(&[(0, true), (3, true)])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(video.enable_flags(), vec![true, false, false, true]);
    }

    // =========================================================================
    // notification tests
    // =========================================================================

    #[test]
    fn frame_changes_reach_global_observers() {
        let mut video = video_with(vec![gradient_image(4, 4); 2]);
        let raw = counter(&mut video, ImageLayer::Raw);
        let thumb = counter(&mut video, ImageLayer::Thumbnail);

        video
            .edit(|s| {
                s.set_enable(0, false)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(raw.load(Ordering::SeqCst), 0);
        assert_eq!(thumb.load(Ordering::SeqCst), 1);

        video
            .edit(|s| {
                s.delete_frame(0)?;
                s.set_enable(0, false)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(raw.load(Ordering::SeqCst), 1);
        assert_eq!(thumb.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn synthetic_change_keeps_timestamp() {
        let mut video = VideoModel::new();
        video
            .edit(|s| {
                s.set_time_stamp(Some("2024-01-02_03-04-05_678"))?;
                Ok(())
            })
            .unwrap();
        video
            .edit(|s| {
                s.append_images(vec![gradient_image(4, 4)])?;
                s.clear_frames()?;
                Ok(())
            })
            .unwrap();
        assert_eq!(video.time_stamp(), "2024-01-02_03-04-05_678");
    }

    #[test]
    fn duration_handlers_fire_on_change_only() {
        let mut video = VideoModel::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s2 = Arc::clone(&seen);
        video.register_duration_change_handler(move |d| s2.lock().unwrap().push(d));

        let default = video.duration_in_msec();
        video
            .edit(|s| {
                s.set_duration_in_msec(default);
                Ok(())
            })
            .unwrap();
        video
            .edit(|s| {
                s.set_duration_in_msec(70);
                Ok(())
            })
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![70]);
    }

    #[test]
    fn default_duration_is_film_rate() {
        assert_eq!(VideoModel::new().duration_in_msec(), 40);
    }

    // =========================================================================
    // duplicate pass tests
    // =========================================================================

    fn plan_from_labels(labels: &[char]) -> Vec<bool> {
        plan_duplicate_frames(labels.len(), 0.5, |a, b| {
            if labels[a] == labels[b] { 1.0 } else { 0.0 }
        })
    }

    #[test]
    fn plan_disables_consecutive_repeats() {
        assert_eq!(
            plan_from_labels(&['A', 'A', 'B', 'B']),
            vec![true, false, true, false]
        );
    }

    #[test]
    fn plan_compares_with_nearest_enabled_predecessor() {
        // A A A B: frames 1 and 2 are both compared against frame 0
        assert_eq!(
            plan_from_labels(&['A', 'A', 'A', 'B']),
            vec![true, false, false, true]
        );
    }

    #[test]
    fn plan_does_not_compare_across_intervening_content() {
        // The last A is compared with B, not with the first A
        assert_eq!(
            plan_from_labels(&['A', 'A', 'B', 'A']),
            vec![true, false, true, true]
        );
    }

    #[test]
    fn plan_stops_drift_chains() {
        // 0~1 and 1~2 are similar, 0~2 is not. After 1 is disabled, 2 is
        // compared with 0 and stays enabled.
        let sim = |a: usize, b: usize| match (a, b) {
            (0, 1) | (1, 2) => 0.99,
            _ => 0.1,
        };
        assert_eq!(plan_duplicate_frames(3, 0.95, sim), vec![true, false, true]);
    }

    #[test]
    fn plan_edge_sizes() {
        assert!(plan_duplicate_frames(0, 0.5, |_, _| 1.0).is_empty());
        assert_eq!(plan_duplicate_frames(1, 0.5, |_, _| 1.0), vec![true]);
    }

    #[test]
    fn disable_duplicates_on_real_images() {
        let a = gradient_image(64, 64);
        let b = checker_image(64, 64, 8);
        let a_copy = ImageValue::from_rgb(a.rgb8().clone());
        let mut video = video_with(vec![a, a_copy, b]);
        let disabled = video.disable_duplicate_frames(0.95, 32).unwrap();
        assert_eq!(disabled, 1);
        assert_eq!(video.enable_flags(), vec![true, false, true]);
    }
}
