use clap::{Args, Parser, Subcommand};
use nime_capture::capture::{
    BackendKind, BlankSource, CaptureStream, SourceSessionFactory, SourceSlot, StreamOptions,
};
use nime_capture::config::{self, AppConfig};
use nime_capture::encoder::ExternalEncoder;
use nime_capture::imaging::{
    AspectRatioPattern, PlaybackMode, ResizeSpec, ResolutionPattern, RustBackend,
    install_overlay_font,
};
use nime_capture::metadata::ContentsMetadata;
use nime_capture::model::{GIF_DURATION_MAP, ImageLayer, ImageModel, VideoModel};
use nime_capture::naming::{NIME_PREFIX, content_stem};
use nime_capture::output;
use nime_capture::persist::{ContentModel, ContentStore, LoadedContent};
use nime_capture::settings::Settings;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Settings keys remembering the last export choices.
const ASPECT_KEY: &str = "resize_aspect_ratio_pattern";
const RESOLUTION_KEY: &str = "resize_resolution_pattern";
const PLAYBACK_KEY: &str = "playback_mode";

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "nime-capture")]
#[command(about = "Capture stills and clips, re-export them, inspect their metadata")]
#[command(long_about = "\
Capture stills and clips, re-export them, inspect their metadata

Every item is saved twice below the export directory:

  raw/{name}__{timestamp}.png    still, lossless RAW capture
  raw/{name}__{timestamp}.zip    clip, one RAW PNG per frame
  nime/{name}__{timestamp}.jpg   still, sized for sharing
  nime/{name}__{timestamp}.gif   clip, sized for sharing

The NIME file carries the export settings (size presets, playback mode,
disabled frames) in its comment block, so re-exporting a NIME file starts
from its RAW sibling with the same settings.

Run 'nime-capture gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Directory holding config.toml and the user settings file
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Root of the raw/ and nime/ trees
    #[arg(long, default_value = ".", global = true)]
    export_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Export size and playback overrides. Unset values fall back to the file's
/// metadata, then to the last values used.
#[derive(Args, Clone)]
struct ExportArgs {
    /// Aspect ratio preset: 16:9, 4:3, 1:1 or RAW
    #[arg(long)]
    aspect: Option<AspectRatioPattern>,
    /// Width preset: 128, 320, 480, 640, 960, 1280, 1920, 2880, 3840, 4096 or RAW
    #[arg(long)]
    resolution: Option<ResolutionPattern>,
    /// Clip frame order: forward, backward or reflect
    #[arg(long)]
    playback: Option<PlaybackMode>,
    /// Draw the name over NIME renditions (true or false)
    #[arg(long)]
    overlay_name: Option<bool>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the export metadata embedded in a file
    Inspect {
        file: PathBuf,
    },
    /// Load a saved still or clip (RAW preferred), resize and save it again
    Reexport {
        file: PathBuf,
        #[command(flatten)]
        export: ExportArgs,
        /// Disable frames that duplicate their predecessor
        #[arg(long)]
        dedup: bool,
    },
    /// Capture from the built-in blank source and save
    Capture {
        /// Name tag used in the file names
        #[arg(long)]
        name: Option<String>,
        /// Record a clip of this many seconds instead of a still
        #[arg(long)]
        clip: Option<f64>,
        /// Clip frame rate
        #[arg(long, default_value_t = 24.0)]
        fps: f64,
        #[command(flatten)]
        export: ExportArgs,
    },
    /// Encode a saved clip to H.264 MP4 with ffmpeg
    Mp4 {
        file: PathBuf,
        /// Frame rate (defaults to the clip's frame duration)
        #[arg(long)]
        fps: Option<f64>,
    },
    /// Re-encode a saved clip as a palette-optimized GIF with ffmpeg and gifsicle
    Gif {
        file: PathBuf,
        /// Frame rate (defaults to the clip's frame duration)
        #[arg(long)]
        fps: Option<f64>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { file } => {
            let metadata = ContentsMetadata::read_embedded(&std::fs::read(&file)?);
            output::print_lines(&output::format_metadata(&file, &metadata));
        }
        Command::Reexport {
            file,
            export,
            dedup,
        } => {
            let config = config::load_config(&cli.config_dir)?;
            init_thread_pool(&config.processing);
            install_font(&cli.config_dir, &config)?;
            let settings = open_settings(&cli.config_dir, &config)?;
            let store = ContentStore::from_export_config(&cli.export_dir, &config.export, RustBackend::new());

            let LoadedContent {
                mut model,
                metadata,
                path,
            } = store.load(&file)?;
            let metadata = resolve_export(&export, metadata, &settings)?;
            apply_export(&mut model, &metadata)?;

            let disabled = match (&mut model, dedup) {
                (ContentModel::Video(video), true) => {
                    let total = video.num_total_frames();
                    let disabled =
                        video.disable_duplicate_frames(config.dedup.threshold, config.dedup.analysis_edge)?;
                    Some(output::format_dedup(disabled, total))
                }
                _ => None,
            };

            let report = store.save(&mut model, &metadata)?;
            let mut lines = output::format_loaded(&LoadedContent {
                model,
                metadata,
                path,
            });
            lines.extend(disabled);
            lines.extend(output::format_save_report(&report, &cli.export_dir));
            output::print_lines(&lines);
        }
        Command::Capture {
            name,
            clip,
            fps,
            export,
        } => {
            let config = config::load_config(&cli.config_dir)?;
            init_thread_pool(&config.processing);
            install_font(&cli.config_dir, &config)?;
            let settings = open_settings(&cli.config_dir, &config)?;
            let store = ContentStore::from_export_config(&cli.export_dir, &config.export, RustBackend::new());
            let metadata = resolve_export(&export, ContentsMetadata::default(), &settings)?;
            let nime_name = name.map(|n| format!("{NIME_PREFIX}{n}"));

            let mut slot = SourceSlot::blank_only();
            slot.switch(BackendKind::Blank)?;
            let factory = SourceSessionFactory::new(Arc::new(Mutex::new(slot)), config.capture.frame_rate);
            let mut stream = CaptureStream::new(factory, StreamOptions::from_capture_config(&config.capture));
            if let (Some(aspect), Some(resolution)) = (
                metadata.resize_aspect_ratio_pattern,
                metadata.resize_resolution_pattern,
            ) {
                stream.set_max_size_pattern(aspect, resolution)?;
            }
            stream.set_capture_window(Some(BlankSource::TARGET))?;

            let mut model = match clip {
                Some(secs) => {
                    std::thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
                    let frames = stream.capture_animation(fps, secs)?;
                    let mut video = VideoModel::new();
                    video.edit(|s| {
                        s.set_nime_name(nime_name)?;
                        s.set_duration_in_msec(GIF_DURATION_MAP.by_frame_rate(fps).duration_in_msec);
                        s.append_images(frames)?;
                        Ok(())
                    })?;
                    ContentModel::Video(video)
                }
                None => {
                    let still = stream.capture_still(0.0)?;
                    ContentModel::Image(ImageModel::with_raw(Some(still), nime_name, None, true)?)
                }
            };
            stream.release();
            apply_export(&mut model, &metadata)?;

            let report = store.save(&mut model, &metadata)?;
            println!("Captured {}", content_stem(model.nime_name(), model.time_stamp()));
            output::print_lines(&output::format_save_report(&report, &cli.export_dir));
        }
        Command::Mp4 { file, fps } => {
            encode_clip(&cli.config_dir, &cli.export_dir, &file, fps, ClipFormat::Mp4)?;
        }
        Command::Gif { file, fps } => {
            encode_clip(&cli.config_dir, &cli.export_dir, &file, fps, ClipFormat::Gif)?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ClipFormat {
    Mp4,
    Gif,
}

/// Encode the enabled NIME frames of a saved clip with the external tools,
/// next to its NIME file.
fn encode_clip(
    config_dir: &Path,
    export_dir: &Path,
    file: &Path,
    fps: Option<f64>,
    format: ClipFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(config_dir)?;
    install_font(config_dir, &config)?;
    let store = ContentStore::from_export_config(export_dir, &config.export, RustBackend::new());
    let LoadedContent {
        mut model,
        metadata,
        ..
    } = store.load(file)?;
    apply_export(&mut model, &metadata)?;
    let ContentModel::Video(mut video) = model else {
        return Err(format!("{} is not a clip", file.display()).into());
    };

    let playback = metadata.playback_mode.unwrap_or_default();
    let frames = playback.apply(video.iter_frames(ImageLayer::Nime, true).collect());
    let frame_rate = fps.unwrap_or_else(|| 1000.0 / video.duration_in_msec().max(1) as f64);
    let stem = content_stem(video.nime_name(), video.time_stamp());

    let mut recorded = metadata.with_playback_mode(playback);
    recorded.set_frame_enables(&video.enable_flags());

    std::fs::create_dir_all(store.nime_dir())?;
    let encoder = ExternalEncoder::from_export_config(&config.export);
    let dest = match format {
        ClipFormat::Mp4 => {
            let dest = store.nime_dir().join(format!("{stem}.mp4"));
            encoder.encode_h264(&dest, &frames, frame_rate, &recorded)?;
            dest
        }
        ClipFormat::Gif => {
            let dest = store.nime_dir().join(format!("{stem}.gif"));
            encoder.encode_gif(&dest, &frames, frame_rate, &recorded)?;
            dest
        }
    };
    println!("{}", output::format_encoded(&dest, frames.len(), frame_rate));
    Ok(())
}

/// Load the configured overlay font, relative to the config directory.
fn install_font(config_dir: &Path, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(font) = &config.export.overlay_font {
        install_overlay_font(&config_dir.join(font))?;
    }
    Ok(())
}

fn open_settings(config_dir: &Path, config: &AppConfig) -> Result<Settings, Box<dyn std::error::Error>> {
    Ok(Settings::open(config_dir.join(&config.settings.path), &config.settings)?)
}

/// Stored choice for `key`; `None` when it no longer parses.
fn remembered<T: std::str::FromStr>(settings: &Settings, key: &str, default: &str) -> Option<T> {
    settings.get(key, default.to_string()).parse().ok()
}

/// Choose export settings: command line, then the file's metadata, then the
/// last values used. The choice is remembered for next time.
fn resolve_export(
    args: &ExportArgs,
    metadata: ContentsMetadata,
    settings: &Settings,
) -> Result<ContentsMetadata, Box<dyn std::error::Error>> {
    let aspect = args
        .aspect
        .or(metadata.resize_aspect_ratio_pattern)
        .or_else(|| remembered(settings, ASPECT_KEY, "RAW"))
        .unwrap_or(AspectRatioPattern::Raw);
    let resolution = args
        .resolution
        .or(metadata.resize_resolution_pattern)
        .or_else(|| remembered(settings, RESOLUTION_KEY, "640"))
        .unwrap_or(ResolutionPattern::W640);
    let overlay = args.overlay_name.or(metadata.overlay_nime_name);
    let playback = args
        .playback
        .or(metadata.playback_mode)
        .or_else(|| remembered(settings, PLAYBACK_KEY, "FORWARD"))
        .unwrap_or_default();

    // Reject the combination before anything is remembered.
    ResizeSpec::from_patterns(aspect, resolution)?;
    settings.set(ASPECT_KEY, &aspect.as_str().to_string())?;
    settings.set(RESOLUTION_KEY, &resolution.as_str().to_string())?;
    settings.set(PLAYBACK_KEY, &playback.as_str().to_string())?;

    let metadata = metadata
        .with_patterns(aspect, resolution)
        .with_playback_mode(playback);
    Ok(match overlay {
        Some(overlay) => metadata.with_overlay_nime_name(overlay),
        None => metadata,
    })
}

/// Size the NIME layer from the metadata's presets, when both are present,
/// and apply its name overlay flag.
fn apply_export(model: &mut ContentModel, metadata: &ContentsMetadata) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(overlay) = metadata.overlay_nime_name {
        model.set_overlay_nime_name(overlay)?;
    }
    if let (Some(aspect), Some(resolution)) = (
        metadata.resize_aspect_ratio_pattern,
        metadata.resize_resolution_pattern,
    ) {
        model.set_nime_size(ResizeSpec::from_patterns(aspect, resolution)?)?;
    }
    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
