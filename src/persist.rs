//! Saving and loading captured content.
//!
//! Every item is stored twice under the export root:
//!
//! ```text
//! raw/{stem}.png    still: lossless RAW capture
//! raw/{stem}.zip    video: one RAW PNG per frame, enable flag in the entry name
//! nime/{stem}.jpg   still: NIME rendition, export metadata in a COM segment
//! nime/{stem}.gif   video: enabled NIME frames in playback order, metadata comment
//! ```
//!
//! `{stem}` is `{name}__{timestamp}` (see [`crate::naming`]).
//!
//! ## Write policy
//!
//! - **RAW** is written only when the file is missing or older than the
//!   model's `raw_changed_at`. Loaded models report the epoch, so re-exporting
//!   an old capture never touches its RAW file.
//! - **MAIN** (the NIME file) is re-encoded on every save because sizes may
//!   have changed, but only written when its SHA-256 differs from the file on
//!   disk. Saving an unchanged model twice writes nothing the second time.
//!
//! ## Load policy
//!
//! Loading a MAIN file prefers the RAW sibling (`.jpg` → `raw/{stem}.png`,
//! `.gif` → `raw/{stem}.zip`) so re-exports start from full quality. Export
//! metadata is read from the requested file's comment block.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::ExportConfig;
use crate::imaging::{BackendError, ImageBackend, ImageValue, Quality, ResizeSpec};
use crate::metadata::{ContentsMetadata, MetadataError};
use crate::model::{GIF_DURATION_MAP, ImageLayer, ImageModel, ModelError, VideoModel};
use crate::naming::{content_stem, parse_stem, zip_entry_enable, zip_entry_name};

const STILL_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image codec error: {0}")]
    Backend(#[from] BackendError),
    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("model has no {0:?} image")]
    MissingImage(ImageLayer),
    #[error("video has no frames to export")]
    NoFrames,
    #[error("unsupported file type: {0}")]
    UnsupportedExtension(String),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("frame {index} is {found:?}, expected {expected:?}")]
    FrameSizeMismatch {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },
}

/// A still or a video.
#[derive(Debug)]
pub enum ContentModel {
    Image(ImageModel),
    Video(VideoModel),
}

impl ContentModel {
    pub fn nime_name(&self) -> Option<&str> {
        match self {
            Self::Image(m) => m.nime_name(),
            Self::Video(m) => m.nime_name(),
        }
    }

    pub fn time_stamp(&self) -> &str {
        match self {
            Self::Image(m) => m.time_stamp(),
            Self::Video(m) => m.time_stamp(),
        }
    }

    pub fn overlay_nime_name(&self) -> bool {
        match self {
            Self::Image(m) => m.overlay_nime_name(),
            Self::Video(m) => m.overlay_nime_name(),
        }
    }

    /// Draw the NIME name over NIME renditions.
    pub fn set_overlay_nime_name(&mut self, overlay: bool) -> Result<(), ModelError> {
        match self {
            Self::Image(m) => m.edit(|s| {
                s.set_overlay_nime_name(overlay);
                Ok(())
            }),
            Self::Video(m) => m.edit(|s| {
                s.set_overlay_nime_name(overlay)?;
                Ok(())
            }),
        }
    }

    /// Apply `spec` to the NIME layer.
    pub fn set_nime_size(&mut self, spec: ResizeSpec) -> Result<(), ModelError> {
        match self {
            Self::Image(m) => m.edit(|s| {
                s.set_size(ImageLayer::Nime, spec)?;
                Ok(())
            }),
            Self::Video(m) => m.edit(|s| {
                s.set_size(ImageLayer::Nime, spec)?;
                Ok(())
            }),
        }
    }
}

/// Result of loading a file.
#[derive(Debug)]
pub struct LoadedContent {
    pub model: ContentModel,
    pub metadata: ContentsMetadata,
    /// The file the frames were actually read from.
    pub path: PathBuf,
}

/// Files touched by a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub raw_path: PathBuf,
    pub main_path: PathBuf,
    pub raw_written: bool,
    pub main_written: bool,
}

/// Write `bytes` unless the file already holds exactly them. Returns whether
/// a write happened.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if Sha256::digest(&existing) == Sha256::digest(bytes) {
            return Ok(false);
        }
    }
    fs::write(path, bytes)?;
    Ok(true)
}

/// RAW needs writing when missing or older than the last RAW change.
fn raw_is_stale(path: &Path, raw_changed_at: SystemTime) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified < raw_changed_at,
        Err(_) => true,
    }
}

/// Filesystem clocks can stamp a fresh file slightly before `raw_changed_at`;
/// clamp so the next save sees the file as current.
fn settled_change_time(path: &Path, raw_changed_at: SystemTime) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_or(raw_changed_at, |modified| modified.min(raw_changed_at))
}

fn lower_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn to_rgb(image: ImageValue) -> ImageValue {
    ImageValue::from_rgb(image.rgb8().clone())
}

/// Export tree rooted at two directories, encoding through `backend`.
#[derive(Debug)]
pub struct ContentStore<B: ImageBackend> {
    raw_dir: PathBuf,
    nime_dir: PathBuf,
    backend: B,
    quality: Quality,
}

impl<B: ImageBackend> ContentStore<B> {
    pub fn new(raw_dir: impl Into<PathBuf>, nime_dir: impl Into<PathBuf>, backend: B) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            nime_dir: nime_dir.into(),
            backend,
            quality: Quality::default(),
        }
    }

    /// Store under `export_root` laid out per `[export]`.
    pub fn from_export_config(export_root: &Path, config: &ExportConfig, backend: B) -> Self {
        Self {
            raw_dir: export_root.join(&config.raw_dir),
            nime_dir: export_root.join(&config.nime_dir),
            backend,
            quality: Quality::new(config.jpeg_quality),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn nime_dir(&self) -> &Path {
        &self.nime_dir
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.raw_dir)?;
        fs::create_dir_all(&self.nime_dir)
    }

    pub fn save(
        &self,
        model: &mut ContentModel,
        metadata: &ContentsMetadata,
    ) -> Result<SaveReport, PersistError> {
        match model {
            ContentModel::Image(m) => self.save_image(m, metadata),
            ContentModel::Video(m) => self.save_video(m, metadata),
        }
    }

    /// Save a still: RAW PNG (when stale) and NIME JPEG with metadata.
    pub fn save_image(
        &self,
        model: &mut ImageModel,
        metadata: &ContentsMetadata,
    ) -> Result<SaveReport, PersistError> {
        let raw = model
            .raw_image()
            .cloned()
            .ok_or(PersistError::MissingImage(ImageLayer::Raw))?;
        let nime = model
            .get_image(ImageLayer::Nime)
            .ok_or(PersistError::MissingImage(ImageLayer::Nime))?;
        self.ensure_dirs()?;

        let stem = content_stem(model.nime_name(), model.time_stamp());
        let raw_path = self.raw_dir.join(format!("{stem}.png"));
        let raw_written = raw_is_stale(&raw_path, model.raw_changed_at());
        if raw_written {
            fs::write(&raw_path, self.backend.encode_png(&to_rgb(raw))?)?;
            model.set_raw_changed_at(settled_change_time(&raw_path, model.raw_changed_at()));
            log::info!("Saved {}", raw_path.display());
        } else {
            log::debug!("RAW {} is current, skipped", raw_path.display());
        }

        let main_path = self.nime_dir.join(format!("{stem}.jpg"));
        let jpeg = self.backend.encode_jpeg(&nime, self.quality)?;
        let jpeg = self.backend.embed_comment(jpeg, metadata.encode()?.as_bytes())?;
        let main_written = write_if_changed(&main_path, &jpeg)?;
        if main_written {
            log::info!("Saved {}", main_path.display());
        } else {
            log::debug!("{} unchanged, skipped", main_path.display());
        }

        Ok(SaveReport {
            raw_path,
            main_path,
            raw_written,
            main_written,
        })
    }

    /// Save a video: RAW zip of every frame (when stale) and a looping GIF
    /// of the enabled NIME frames.
    ///
    /// The GIF comment always records the playback mode used and the
    /// disabled frame indices, overriding whatever `metadata` carried.
    pub fn save_video(
        &self,
        model: &mut VideoModel,
        metadata: &ContentsMetadata,
    ) -> Result<SaveReport, PersistError> {
        if model.num_total_frames() == 0 {
            return Err(PersistError::NoFrames);
        }
        let frames: Vec<ImageValue> = model.iter_frames(ImageLayer::Nime, true).collect();
        if frames.is_empty() {
            return Err(PersistError::NoFrames);
        }
        let expected = frames[0].dimensions();
        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.dimensions() != expected)
        {
            return Err(PersistError::FrameSizeMismatch {
                index,
                expected,
                found: frame.dimensions(),
            });
        }
        self.ensure_dirs()?;

        let stem = content_stem(model.nime_name(), model.time_stamp());
        let raw_path = self.raw_dir.join(format!("{stem}.zip"));
        let raw_written = raw_is_stale(&raw_path, model.raw_changed_at());
        if raw_written {
            fs::write(&raw_path, self.raw_archive(model)?)?;
            model.set_raw_changed_at(settled_change_time(&raw_path, model.raw_changed_at()));
            log::info!("Saved {}", raw_path.display());
        } else {
            log::debug!("RAW {} is current, skipped", raw_path.display());
        }

        let playback = metadata.playback_mode.unwrap_or_default();
        let mut recorded = metadata.clone();
        recorded.playback_mode = Some(playback);
        recorded.set_frame_enables(&model.enable_flags());

        let main_path = self.nime_dir.join(format!("{stem}.gif"));
        let ordered = playback.apply(frames);
        let gif = self.backend.encode_gif(&ordered, model.duration_in_msec())?;
        let gif = self.backend.embed_comment(gif, recorded.encode()?.as_bytes())?;
        let main_written = write_if_changed(&main_path, &gif)?;
        if main_written {
            log::info!("Saved {} ({} frames)", main_path.display(), ordered.len());
        } else {
            log::debug!("{} unchanged, skipped", main_path.display());
        }

        Ok(SaveReport {
            raw_path,
            main_path,
            raw_written,
            main_written,
        })
    }

    fn raw_archive(&self, model: &mut VideoModel) -> Result<Vec<u8>, PersistError> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let time_stamp = model.time_stamp().to_string();
        let flags = model.enable_flags();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (index, (raw, enable)) in model
            .iter_frames(ImageLayer::Raw, false)
            .zip(flags)
            .enumerate()
        {
            zip.start_file(zip_entry_name(&time_stamp, index, enable), options)?;
            zip.write_all(&self.backend.encode_png(&raw)?)?;
        }
        Ok(zip.finish()?.into_inner())
    }

    /// Load a saved still or video. See the [module docs](self) for which
    /// file is actually read.
    pub fn load(&self, path: &Path) -> Result<LoadedContent, PersistError> {
        let extension = lower_extension(path);
        let stem = file_stem(path);

        if STILL_EXTENSIONS.contains(&extension.as_str()) {
            let raw_path = self.raw_dir.join(format!("{stem}.png"));
            let source = existing(&raw_path, path)?;
            let metadata = self.read_metadata(path);
            let model = self.load_still(&source)?;
            return Ok(LoadedContent {
                model: ContentModel::Image(model),
                metadata,
                path: source,
            });
        }

        match extension.as_str() {
            "gif" => {
                let raw_path = self.raw_dir.join(format!("{stem}.zip"));
                let source = existing(&raw_path, path)?;
                let metadata = self.read_metadata(path);
                let animation = self.backend.decode_gif(&fs::read(path)?)?;
                let duration = animation
                    .average_delay_ms()
                    .unwrap_or(GIF_DURATION_MAP.fallback_entry().duration_in_msec);
                let model = if source == path {
                    let frames = animation.frames.into_iter().map(|f| (to_rgb(f), true));
                    build_video(&source, frames.collect(), duration)?
                } else {
                    self.load_archive(&source, duration)?
                };
                Ok(LoadedContent {
                    model: ContentModel::Video(model),
                    metadata,
                    path: source,
                })
            }
            "zip" => {
                if !path.exists() {
                    return Err(PersistError::NotFound(path.to_path_buf()));
                }
                let model =
                    self.load_archive(path, GIF_DURATION_MAP.fallback_entry().duration_in_msec)?;
                Ok(LoadedContent {
                    model: ContentModel::Video(model),
                    metadata: ContentsMetadata::default(),
                    path: path.to_path_buf(),
                })
            }
            _ => Err(PersistError::UnsupportedExtension(path.display().to_string())),
        }
    }

    fn read_metadata(&self, path: &Path) -> ContentsMetadata {
        fs::read(path)
            .ok()
            .and_then(|bytes| self.backend.read_comment(&bytes))
            .map(|comment| ContentsMetadata::decode_bytes(&comment))
            .unwrap_or_default()
    }

    fn load_still(&self, path: &Path) -> Result<ImageModel, PersistError> {
        let image = to_rgb(self.backend.decode(&fs::read(path)?)?);
        let parsed = parse_stem(&file_stem(path));
        let mut model =
            ImageModel::with_raw(Some(image), parsed.nime_name, Some(&parsed.time_stamp), true)?;
        model.set_raw_changed_at(UNIX_EPOCH);
        Ok(model)
    }

    /// Frames of a RAW zip in archive order.
    fn load_archive(&self, path: &Path, duration_in_msec: u32) -> Result<VideoModel, PersistError> {
        let mut archive = ZipArchive::new(fs::File::open(path)?)?;

        let mut frames = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let enable = zip_entry_enable(entry.name());
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            let image = to_rgb(self.backend.decode(&bytes)?);
            frames.push((image, enable));
        }
        build_video(path, frames, duration_in_msec)
    }
}

/// `primary` when it exists, else `fallback`, else `NotFound`.
fn existing(primary: &Path, fallback: &Path) -> Result<PathBuf, PersistError> {
    if primary.exists() {
        Ok(primary.to_path_buf())
    } else if fallback.exists() {
        Ok(fallback.to_path_buf())
    } else {
        Err(PersistError::NotFound(fallback.to_path_buf()))
    }
}

fn build_video(
    path: &Path,
    frames: Vec<(ImageValue, bool)>,
    duration_in_msec: u32,
) -> Result<VideoModel, PersistError> {
    let parsed = parse_stem(&file_stem(path));
    let frames = frames
        .into_iter()
        .map(|(image, enable)| ImageModel::with_raw(Some(image), None, None, enable))
        .collect::<Result<Vec<_>, _>>()?;

    let mut model = VideoModel::new();
    model.edit(|s| {
        s.set_nime_name(parsed.nime_name)?;
        s.set_time_stamp(Some(&parsed.time_stamp))?;
        s.set_duration_in_msec(duration_in_msec);
        s.append_frames(frames)?;
        Ok(())
    })?;
    model.set_raw_changed_at(UNIX_EPOCH);
    Ok(model)
}
