//! Video export through external tools.
//!
//! Frames are streamed as raw RGB24 into the tool's stdin. Commands are
//! explicit argument vectors; nothing goes through a shell.
//!
//! | Output | Pipeline |
//! |---|---|
//! | **MP4** | `ffmpeg` with a hardware H.264 encoder (NVENC > QSV > AMF) |
//! | **GIF** | `ffmpeg` palettegen/paletteuse → `gifsicle -O3` → file |
//!
//! Hardware encoders accept different option sets depending on driver and
//! build, so H.264 runs a ladder of argument sets from rich to minimal and
//! stops at the first that succeeds.
//!
//! Tool stderr is drained on helper threads so a chatty tool never blocks on
//! a full pipe.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread::{self, JoinHandle};

use regex::Regex;
use thiserror::Error;

use crate::config::ExportConfig;
use crate::imaging::{ImageValue, crop_top_left, even_size};
use crate::metadata::{ContentsMetadata, MetadataError};

/// Quality target shared by the rich argument sets.
const H264_QUALITY: u32 = 24;

static H264_ENCODER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(h264_\w+)\b").expect("valid regex"));

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("no frames to encode")]
    EmptyFrames,
    #[error("frame {index} is {found:?}, expected {expected:?}")]
    FrameSizeMismatch {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("no H.264 hardware encoder found (tried h264_nvenc, h264_qsv, h264_amf)")]
    NoHardwareEncoder,
    #[error("{tool} failed (exit code {code:?}): {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("every {encoder} argument set failed; last error: {last}")]
    AllAttemptsFailed {
        encoder: H264Encoder,
        last: Box<EncodeError>,
    },
}

/// Hardware H.264 encoders in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Encoder {
    Nvenc,
    Qsv,
    Amf,
}

impl H264Encoder {
    pub const PREFERENCE: [Self; 3] = [Self::Nvenc, Self::Qsv, Self::Amf];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nvenc => "h264_nvenc",
            Self::Qsv => "h264_qsv",
            Self::Amf => "h264_amf",
        }
    }

    /// Encoder argument sets, richest first. The last is always the bare
    /// `-c:v <encoder>`.
    pub fn attempts(self) -> Vec<Vec<String>> {
        let q = H264_QUALITY.to_string();
        let rich: Vec<&str> = match self {
            Self::Nvenc => vec!["-rc", "vbr", "-cq", &q, "-b:v", "0", "-preset", "p5"],
            Self::Qsv => vec!["-global_quality", &q, "-preset", "medium"],
            Self::Amf => vec!["-rc", "cqp", "-qp_i", &q, "-qp_p", &q, "-quality", "speed"],
        };
        let codec = ["-c:v", self.as_str()];
        vec![
            codec.iter().chain(&rich).map(|s| s.to_string()).collect(),
            codec.iter().map(|s| s.to_string()).collect(),
        ]
    }
}

impl std::fmt::Display for H264Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the preferred hardware encoder from `ffmpeg -encoders` output.
pub fn parse_h264_encoders(listing: &str) -> Option<H264Encoder> {
    let found: Vec<&str> = listing
        .lines()
        .filter_map(|line| H264_ENCODER_RE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    H264Encoder::PREFERENCE
        .into_iter()
        .find(|encoder| found.contains(&encoder.as_str()))
}

/// Common size of `frames`, rejecting empty lists and mixed sizes.
pub fn check_frames(frames: &[ImageValue]) -> Result<(u32, u32), EncodeError> {
    let first = frames.first().ok_or(EncodeError::EmptyFrames)?;
    let expected = first.dimensions();
    for (index, frame) in frames.iter().enumerate() {
        if frame.dimensions() != expected {
            return Err(EncodeError::FrameSizeMismatch {
                index,
                expected,
                found: frame.dimensions(),
            });
        }
    }
    Ok(expected)
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// ffmpeg arguments shared by every H.264 attempt; the encoder set and the
/// destination follow.
pub fn h264_base_args(size: (u32, u32), frame_rate: f64, metadata: &str) -> Vec<String> {
    let mut args = strings(&["-y", "-hide_banner", "-loglevel", "error"]);
    args.extend(strings(&["-f", "rawvideo", "-pix_fmt", "rgb24"]));
    args.extend([
        "-s".to_string(),
        format!("{}x{}", size.0, size.1),
        "-r".to_string(),
        frame_rate.to_string(),
    ]);
    args.extend(strings(&["-i", "pipe:0", "-an", "-sn", "-dn"]));
    args.extend(strings(&[
        "-pix_fmt",
        "yuv420p",
        "-movflags",
        "+faststart+use_metadata_tags",
    ]));
    args.extend(["-metadata".to_string(), format!("comment={metadata}")]);
    args
}

/// ffmpeg arguments turning raw RGB on stdin into a looping GIF on stdout.
///
/// `stats_mode=diff` spends palette entries on moving content.
pub fn gif_ffmpeg_args(size: (u32, u32), frame_rate: f64, colors: u32, bayer_scale: u32) -> Vec<String> {
    let filter = format!(
        "split[a][b];[a]palettegen=max_colors={colors}:stats_mode=diff[p];\
         [b][p]paletteuse=dither=bayer:bayer_scale={bayer_scale}:diff_mode=rectangle"
    );
    let mut args = strings(&["-hide_banner", "-loglevel", "error"]);
    args.extend(strings(&["-f", "rawvideo", "-pix_fmt", "rgb24"]));
    args.extend([
        "-s".to_string(),
        format!("{}x{}", size.0, size.1),
        "-framerate".to_string(),
        frame_rate.to_string(),
    ]);
    args.extend(strings(&["-i", "pipe:0", "-an", "-sn", "-dn"]));
    args.extend(["-filter_complex".to_string(), filter]);
    args.extend(strings(&["-f", "gif", "-loop", "0", "pipe:1"]));
    args
}

/// gifsicle arguments: replace all comments with `metadata`, loop forever,
/// optimize, stdin to stdout.
pub fn gifsicle_args(metadata: &str) -> Vec<String> {
    let mut args = strings(&["--no-comments", "--no-names", "--no-extensions", "--loopcount"]);
    args.extend(["--comment".to_string(), metadata.to_string()]);
    args.extend(strings(&["-O3", "-o", "-", "-"]));
    args
}

fn drain(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut output = String::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_string(&mut output) {
                output = format!("<failed to read stderr: {e}>");
            }
        }
        output
    })
}

fn collect(handle: JoinHandle<String>) -> String {
    handle
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
}

/// Write every frame's RGB bytes. A closed pipe is reported as `Ok(false)`;
/// the tool's exit status explains why.
fn feed(child: &mut Child, frames: &[ImageValue], size: (u32, u32)) -> io::Result<bool> {
    let Some(mut stdin) = child.stdin.take() else {
        return Err(io::Error::other("tool stdin was not captured"));
    };
    for frame in frames {
        let frame = crop_top_left(frame, size.0, size.1);
        match stdin.write_all(frame.rgb8().as_raw()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn tool_result(tool: &Path, status: ExitStatus, stderr: String) -> Result<(), EncodeError> {
    if status.success() {
        Ok(())
    } else {
        Err(EncodeError::ToolFailed {
            tool: tool.display().to_string(),
            code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

fn broken_pipe(tool: &Path) -> EncodeError {
    EncodeError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("{} closed its input early but reported success", tool.display()),
    ))
}

/// Run `program args` with `frames` on stdin, discarding stdout.
fn run_with_frames(
    program: &Path,
    args: &[String],
    frames: &[ImageValue],
    size: (u32, u32),
) -> Result<(), EncodeError> {
    log::debug!("Running {} {}", program.display(), args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;
    let stderr = drain(child.stderr.take());
    let fed = feed(&mut child, frames, size);
    let status = child.wait()?;
    let stderr = collect(stderr);
    tool_result(program, status, stderr)?;
    if !fed? {
        return Err(broken_pipe(program));
    }
    Ok(())
}

/// Runs `ffmpeg` and `gifsicle` for exports the `image` crate does not cover.
#[derive(Debug, Clone)]
pub struct ExternalEncoder {
    ffmpeg: PathBuf,
    gifsicle: PathBuf,
    gif_colors: u32,
    gif_bayer_scale: u32,
}

impl ExternalEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, gifsicle: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            gifsicle: gifsicle.into(),
            gif_colors: 256,
            gif_bayer_scale: 2,
        }
    }

    pub fn from_export_config(config: &ExportConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            gifsicle: config.gifsicle.clone(),
            gif_colors: config.gif_colors,
            gif_bayer_scale: config.gif_bayer_scale,
        }
    }

    /// Query ffmpeg for its encoders and pick the preferred hardware H.264 one.
    pub fn detect_h264_encoder(&self) -> Result<H264Encoder, EncodeError> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(EncodeError::ToolFailed {
                tool: self.ffmpeg.display().to_string(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        let encoder = parse_h264_encoders(&format!("{stdout}\n{stderr}"))
            .ok_or(EncodeError::NoHardwareEncoder)?;
        log::debug!("Using H.264 encoder {encoder}");
        Ok(encoder)
    }

    /// Encode `frames` to an H.264 MP4 at `dest` with `metadata` in the
    /// container's comment tag. Frames are cropped to even dimensions.
    pub fn encode_h264(
        &self,
        dest: &Path,
        frames: &[ImageValue],
        frame_rate: f64,
        metadata: &ContentsMetadata,
    ) -> Result<(), EncodeError> {
        let size = even_size(check_frames(frames)?);
        let encoder = self.detect_h264_encoder()?;
        let base = h264_base_args(size, frame_rate, &metadata.encode()?);

        let mut last = None;
        for extra in encoder.attempts() {
            let mut args = base.clone();
            args.extend(extra);
            args.push(dest.display().to_string());
            match run_with_frames(&self.ffmpeg, &args, frames, size) {
                Ok(()) => {
                    log::info!("Saved {} ({} frames, {encoder})", dest.display(), frames.len());
                    return Ok(());
                }
                Err(e) => {
                    log::debug!("{encoder} attempt failed: {e}");
                    last = Some(e);
                }
            }
        }
        Err(EncodeError::AllAttemptsFailed {
            encoder,
            last: Box::new(last.unwrap_or(EncodeError::NoHardwareEncoder)),
        })
    }

    /// Encode `frames` to an optimized looping GIF at `dest` carrying
    /// `metadata` as its only comment.
    pub fn encode_gif(
        &self,
        dest: &Path,
        frames: &[ImageValue],
        frame_rate: f64,
        metadata: &ContentsMetadata,
    ) -> Result<(), EncodeError> {
        let size = check_frames(frames)?;
        let ffmpeg_args = gif_ffmpeg_args(size, frame_rate, self.gif_colors, self.gif_bayer_scale);
        let gifsicle_args = gifsicle_args(&metadata.encode()?);
        let out = File::create(dest)?;

        let mut ffmpeg = Command::new(&self.ffmpeg)
            .args(&ffmpeg_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let Some(palette_out) = ffmpeg.stdout.take() else {
            return Err(EncodeError::Io(io::Error::other("ffmpeg stdout was not captured")));
        };
        let mut gifsicle = match Command::new(&self.gifsicle)
            .args(&gifsicle_args)
            .stdin(Stdio::from(palette_out))
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                // Closing stdin lets ffmpeg exit before it is reaped.
                drop(ffmpeg.stdin.take());
                let _ = ffmpeg.wait();
                return Err(e.into());
            }
        };

        let ffmpeg_stderr = drain(ffmpeg.stderr.take());
        let gifsicle_stderr = drain(gifsicle.stderr.take());
        let fed = feed(&mut ffmpeg, frames, size);

        let gifsicle_status = gifsicle.wait()?;
        let ffmpeg_status = ffmpeg.wait()?;
        let ffmpeg_stderr = collect(ffmpeg_stderr);
        let gifsicle_stderr = collect(gifsicle_stderr);

        tool_result(&self.ffmpeg, ffmpeg_status, ffmpeg_stderr)?;
        tool_result(&self.gifsicle, gifsicle_status, gifsicle_stderr)?;
        if !fed? {
            return Err(broken_pipe(&self.ffmpeg));
        }
        log::info!("Saved {} ({} frames)", dest.display(), frames.len());
        Ok(())
    }
}
