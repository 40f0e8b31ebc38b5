//! Overlay runtime for installed uncork packages.
//!
//! This crate implements the execution layer shared by the capture-time
//! launcher generator and the first-run lifecycle: overlay mount/unmount
//! against fuse-overlayfs with the live mount table as ground truth, a
//! per-package/per-user mount reference counter, the overlay state machine,
//! launcher and hook script generation, and prerequisite checking.

pub mod launcher;
pub mod lifecycle;
pub mod overlay;
pub mod prereq;
pub mod refcount;

pub use launcher::{generate_all, LauncherFile};
pub use lifecycle::{validate_transition, OverlayState};
pub use overlay::{instantiate, is_mounted, purge_user_data, InstanceKind, OverlayMount};
pub use prereq::{check_overlay_prereqs, format_missing, MissingPrereq};
pub use refcount::MountGuard;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("required tool not found: {0}")]
    ToolMissing(String),
    #[error("overlay mount failed: {0}")]
    MountFailed(String),
    #[error("overlay unmount failed: {0}")]
    UnmountFailed(String),
    #[error("external tool '{tool}' did not finish within {seconds}s")]
    Timeout { tool: String, seconds: u64 },
    #[error("mount lock error: {0}")]
    LockFailed(String),
    #[error("invalid overlay state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
