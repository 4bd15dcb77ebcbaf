//! # notes-consolidate
//!
//! Inlines the attachments of exported Markdown notes into the notes themselves.
//!
//! ## What it does
//!
//! Note apps such as Bear export each note as a Markdown file plus a folder of the
//! same name holding its attachments. This crate walks such an export, converts
//! every referenced attachment to Markdown (documents through an external
//! converter, images through a vision model), and writes a copy of each note with
//! the converted text placed right after the reference, inside a collapsible
//! `<details>` block.
//!
//! ## Incremental runs
//!
//! A note is regenerated only when it, or a file in its attachment folder, is newer
//! than the output already written. Conversion results are cached on disk, keyed by
//! the attachment path, its modification time and the conversion parameters, so an
//! unchanged attachment is never sent to the converter twice.
//!
//! ## Usage
//!
//! ```sh
//! notes-consolidate ~/Exports/Bear ~/Notes/merged
//!
//! # Documents only, four workers
//! notes-consolidate ~/Exports/Bear ~/Notes/merged --skip-vision --jobs 4
//! ```
//!
//! Preferences can be persisted in `~/.config/notes-consolidate/config.toml`.

pub mod cache;
pub mod converter;
pub mod detect;
pub mod error;
pub mod note;
pub mod observer;
pub mod orchestrator;
mod parallel;
pub mod paths;
pub mod process;
pub mod references;
pub mod render;
mod sequential;
pub mod services;
pub mod stats;
pub mod transcode;
pub mod utils;

pub use orchestrator::Orchestrator;
pub use utils::{CachePolicy, RunOptions};
