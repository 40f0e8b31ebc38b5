//! Native package builders for uncork.
//!
//! Consumes a manifest plus intermediate tree and produces one installable
//! artifact per requested format. All builders share a single staging step
//! (the installed filesystem layout) and a deterministic archive layer, so
//! identical inputs yield byte-identical artifacts for CI caching.

pub mod archive;
pub mod builder;
pub mod deb;
pub mod pacman;
pub mod rpm;
pub mod stage;

#[cfg(test)]
pub(crate) mod testutil;

pub use builder::{build, select_builder, BuildContext, FormatBuilder, PackageFormat};
pub use stage::stage_tree;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Manifest(#[from] uncork_spec::ManifestError),
    #[error("intermediate tree is missing {0}")]
    MissingInput(PathBuf),
    #[error("packaging tool not found: {tool} ({hint})")]
    ToolMissing { tool: String, hint: String },
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },
    #[error("unknown package format: {0} (expected deb, pacman, rpm, or dir)")]
    UnknownFormat(String),
}
