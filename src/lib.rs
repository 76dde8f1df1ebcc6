//! # NIME Capture
//!
//! Core of a screen capture utility: grab stills and short clips from a
//! window, size them for sharing, and save them so a later session can
//! re-export them exactly.
//!
//! # Architecture: Two Layers per Item
//!
//! Every captured item exists as a lossless RAW capture and a derived NIME
//! rendition. Renditions are never edited directly; they are recomputed from
//! RAW through a small dependency graph whenever a parameter changes:
//!
//! ```text
//! RAW ──▶ NIME (cover) ──┬─▶ PREVIEW (contain)
//!                        └─▶ THUMBNAIL (cover) ──▶ THUMBNAIL with disabled overlay
//! ```
//!
//! On disk the two layers are written next to each other:
//!
//! ```text
//! raw/{name}__{timestamp}.png|.zip    lossless RAW
//! nime/{name}__{timestamp}.jpg|.gif   NIME, export metadata embedded
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`cache_graph`] | Arena of lazily recomputed nodes with dirty propagation to descendants |
//! | [`imaging`] | Image values, size presets, resize / overlay / similarity operations, codecs |
//! | [`model`] | [`model::ImageModel`] and [`model::VideoModel`]: RAW plus cached layers, edit sessions, notifications |
//! | [`capture`] | Frame sources, the look-back ring buffer and the capture stream state machine |
//! | [`metadata`] | Export metadata record and its compressed text encoding |
//! | [`naming`] | Timestamps, name tags and the `{name}__{timestamp}` file stem |
//! | [`persist`] | Save and load of RAW / NIME pairs, write-if-changed |
//! | [`encoder`] | MP4 and palette GIF export through ffmpeg and gifsicle |
//! | [`settings`] | Debounced JSON store of user choices |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Metadata Travels With the File
//!
//! The export settings that produced a NIME file (crop, size presets,
//! playback order, disabled frames) are embedded in its comment block rather
//! than kept in a side database. Moving or renaming files never loses them,
//! and any NIME file can be re-exported from its RAW sibling with the same
//! settings. See [`metadata`] for the wire format.
//!
//! ## Write Only What Changed
//!
//! RAW files are rewritten only when the model's RAW content changed after
//! the file on disk was written. NIME files are rewritten only when their
//! encoded bytes differ. Re-exporting an unchanged item touches nothing.
//!
//! ## Pluggable Codecs
//!
//! Decoding and encoding go through the [`imaging::ImageBackend`] trait. The
//! shipped backend uses the pure-Rust `image` crate; tests substitute a
//! recording mock so pipeline logic runs without touching pixels.
//!
//! ## External Tools Only for Video
//!
//! H.264 and palette-optimized GIFs are delegated to `ffmpeg` and
//! `gifsicle`, invoked with explicit argument vectors. Everything else stays
//! in process.

pub mod cache_graph;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod imaging;
pub mod metadata;
pub mod model;
pub mod naming;
pub mod output;
pub mod persist;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_helpers;
