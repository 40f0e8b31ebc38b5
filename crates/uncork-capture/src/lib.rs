//! Prefix analysis and capture for uncork.
//!
//! This crate turns a live Wine prefix into the intermediate representation:
//! `PrefixAnalyzer` inspects the source (validity, architecture, user,
//! graphics stack, candidate executables), and `PrefixCapture` performs the
//! atomic normalizing export: exclusion-filtered copy, path tokenization,
//! icon extraction, optional Wine bundling, and the manifest.

pub mod analysis;
pub mod capture;
pub mod digest;
pub mod icons;

pub use analysis::{analyze_prefix, DetectedExecutable, PrefixAnalysis, PrefixAnalyzer};
pub use capture::{sanitize_id, CaptureError, ExecutableSpec, PrefixCapture};
pub use icons::{extract_icon, IconError};
