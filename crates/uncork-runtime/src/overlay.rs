//! Overlay mount and unmount against the live mount table.
//!
//! The system mount table is shared state this crate cannot own: every
//! decision here queries `/proc/mounts` instead of trusting memory. Mount and
//! unmount calls to the external tools run under a bounded timeout; a timeout
//! is the tool's failure, never a hang of the caller.

use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use uncork_spec::UserDataLayout;
use wait_timeout::ChildExt;

/// Default bound on a single mount/unmount tool invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff before the single unmount retry on a busy mountpoint.
const UNMOUNT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// A union mount of the read-only template and a per-user writable layer.
#[derive(Debug, Clone)]
pub struct OverlayMount {
    /// Read-only prefix template owned by the package.
    pub lower: PathBuf,
    /// Per-user writable layer.
    pub upper: PathBuf,
    /// fuse-overlayfs scratch directory.
    pub work: PathBuf,
    /// Merged view: the user's prefix instance path.
    pub merged: PathBuf,
}

/// How the per-user prefix instance was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    /// fuse-overlayfs union mount over the read-only template.
    Overlay,
    /// Full recursive copy of the template (overlay unavailable or failed).
    Copy,
}

impl OverlayMount {
    pub fn new(lower: impl Into<PathBuf>, data: &UserDataLayout) -> Self {
        Self {
            lower: lower.into(),
            upper: data.upper_dir(),
            work: data.work_dir(),
            merged: data.prefix_dir(),
        }
    }

    /// Mount the union. Creates the upper, work, and merged directories if
    /// absent; a stale work directory from a crashed mount is discarded.
    pub fn mount(&self, timeout: Duration) -> Result<(), RuntimeError> {
        if is_mounted(&self.merged) {
            debug!("{} already mounted, skipping", self.merged.display());
            return Ok(());
        }

        if self.work.exists() {
            let _ = std::fs::remove_dir_all(&self.work);
        }
        for dir in [&self.upper, &self.work, &self.merged] {
            std::fs::create_dir_all(dir)?;
        }

        let mut cmd = Command::new("fuse-overlayfs");
        cmd.args([
            "-o",
            &format!(
                "lowerdir={},upperdir={},workdir={}",
                self.lower.display(),
                self.upper.display(),
                self.work.display()
            ),
            &self.merged.to_string_lossy(),
        ]);

        let status = run_with_timeout(cmd, "fuse-overlayfs", timeout)?;
        if !status.success() {
            return Err(RuntimeError::MountFailed(format!(
                "fuse-overlayfs exited with {status} for {}",
                self.merged.display()
            )));
        }

        if !is_mounted(&self.merged) {
            return Err(RuntimeError::MountFailed(format!(
                "fuse-overlayfs reported success but {} is not in the mount table",
                self.merged.display()
            )));
        }
        Ok(())
    }

    /// Unmount the union. Idempotent: a missing or never-mounted merged
    /// directory is success, so launcher cleanup and forced removal can race
    /// freely. A busy mountpoint is retried once after a short backoff.
    pub fn unmount(&self, timeout: Duration) -> Result<(), RuntimeError> {
        unmount_path(&self.merged, timeout)
    }

    pub fn is_mounted(&self) -> bool {
        is_mounted(&self.merged)
    }
}

/// Check whether a path is currently a mount point by inspecting /proc/mounts.
pub fn is_mounted(path: &Path) -> bool {
    let canonical = match std::fs::canonicalize(path) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    };
    // /proc/mounts escapes spaces in mount points as \040.
    let escaped = canonical.replace(' ', "\\040");
    match std::fs::read_to_string("/proc/mounts") {
        Ok(mounts) => mounts
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(&escaped)),
        Err(_) => false,
    }
}

fn unmount_path(merged: &Path, timeout: Duration) -> Result<(), RuntimeError> {
    if !merged.exists() || !is_mounted(merged) {
        return Ok(());
    }

    try_unmount_tools(merged, timeout);
    if !is_mounted(merged) {
        return Ok(());
    }

    // One retry with backoff for transient busy-resource conditions.
    std::thread::sleep(UNMOUNT_RETRY_BACKOFF);
    try_unmount_tools(merged, timeout);
    if !is_mounted(merged) {
        return Ok(());
    }

    Err(RuntimeError::UnmountFailed(format!(
        "{} is still present in the mount table",
        merged.display()
    )))
}

fn try_unmount_tools(merged: &Path, timeout: Duration) {
    let target = merged.to_string_lossy().into_owned();
    for tool in ["fusermount3", "fusermount"] {
        let mut cmd = Command::new(tool);
        cmd.args(["-u", &target]);
        match run_with_timeout(cmd, tool, timeout) {
            Ok(status) if status.success() => return,
            Ok(_) | Err(_) => {}
        }
        if !is_mounted(merged) {
            return;
        }
    }
    // Last resort: lazy unmount detaches even a busy tree.
    let mut cmd = Command::new("umount");
    cmd.args(["-l", &target]);
    let _ = run_with_timeout(cmd, "umount", timeout);
}

/// Materialize the per-user prefix instance, preferring an overlay mount and
/// falling back to a full recursive copy. The application is never run
/// against the read-only template directly, where writes would fail.
pub fn instantiate(
    template: &Path,
    data: &UserDataLayout,
    use_overlay: bool,
    timeout: Duration,
) -> Result<InstanceKind, RuntimeError> {
    std::fs::create_dir_all(data.data_root())?;

    if use_overlay {
        let mount = OverlayMount::new(template, data);
        match mount.mount(timeout) {
            Ok(()) => return Ok(InstanceKind::Overlay),
            Err(e) => {
                warn!("overlay unavailable ({e}); falling back to full copy");
            }
        }
    }

    let dest = data.prefix_dir();
    if !dest.join("system.reg").exists() {
        copy_tree(template, &dest)?;
    }
    Ok(InstanceKind::Copy)
}

/// Explicit user-data purge: force-unmount any residual overlay, then remove
/// the whole per-user data directory. Never triggered by package removal.
pub fn purge_user_data(data: &UserDataLayout, timeout: Duration) -> Result<(), RuntimeError> {
    let merged = data.prefix_dir();
    if is_mounted(&merged) {
        unmount_path(&merged, timeout)?;
    }
    if data.data_root().exists() {
        std::fs::remove_dir_all(data.data_root())?;
    }
    Ok(())
}

fn run_with_timeout(
    mut cmd: Command,
    tool: &str,
    timeout: Duration,
) -> Result<std::process::ExitStatus, RuntimeError> {
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::ToolMissing(tool.to_owned())
        } else {
            RuntimeError::Io(e)
        }
    })?;

    match child.wait_timeout(timeout)? {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(RuntimeError::Timeout {
                tool: tool.to_owned(),
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// Recursively copy a directory tree, preserving symlinks and permissions.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<(), RuntimeError> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let meta = entry.path().symlink_metadata()?;

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&from)?;
            if to.symlink_metadata().is_ok() {
                std::fs::remove_file(&to)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &to)?;
        } else if meta.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
