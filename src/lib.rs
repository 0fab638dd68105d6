//! fontdepot - Self-hosted web font subsets
//!
//! Scans a directory of fonts, renders Google-Fonts-compatible
//! `@font-face` CSS and builds per-script WOFF2 subsets on demand. Built
//! subsets are cached on disk and shared safely between processes.

pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod css;
pub mod error;
pub mod registry;
pub mod service;
pub mod subset;
#[doc(hidden)]
pub mod testing;
pub mod ui;

pub use error::{FontDepotError, FontDepotResult};
pub use service::FontService;
