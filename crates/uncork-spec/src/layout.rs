use std::path::{Path, PathBuf};

/// Directory layout of the intermediate representation produced by capture
/// and consumed by every package builder.
///
/// Fixed shape: `manifest.json` at the root, the normalized prefix under
/// `prefix-template/`, optional bundled runtime under `wine/`, extracted
/// icons under `icons/`, generated entry-point scripts under `launchers/`.
#[derive(Debug, Clone)]
pub struct IntermediateLayout {
    root: PathBuf,
}

impl IntermediateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(crate::manifest::MANIFEST_FILE)
    }

    #[inline]
    pub fn prefix_template_dir(&self) -> PathBuf {
        self.root.join("prefix-template")
    }

    #[inline]
    pub fn icons_dir(&self) -> PathBuf {
        self.root.join("icons")
    }

    #[inline]
    pub fn wine_dir(&self) -> PathBuf {
        self.root.join("wine")
    }

    #[inline]
    pub fn launchers_dir(&self) -> PathBuf {
        self.root.join("launchers")
    }
}

/// Layout of an installed package on the target system: the read-only
/// application root plus the lazily created per-user data root.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    system_root: PathBuf,
}

impl InstallLayout {
    pub fn new(system_root: impl Into<PathBuf>) -> Self {
        Self {
            system_root: system_root.into(),
        }
    }

    #[inline]
    pub fn system_root(&self) -> &Path {
        &self.system_root
    }

    #[inline]
    pub fn prefix_template_dir(&self) -> PathBuf {
        self.system_root.join("prefix-template")
    }

    #[inline]
    pub fn bin_dir(&self) -> PathBuf {
        self.system_root.join("bin")
    }

    #[inline]
    pub fn wine_dir(&self) -> PathBuf {
        self.system_root.join("wine")
    }

    #[inline]
    pub fn icons_dir(&self) -> PathBuf {
        self.system_root.join("icons")
    }

    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.system_root.join(crate::manifest::MANIFEST_FILE)
    }
}

/// Per-user data layout for one installed package, relative to the user's
/// data directory (`$XDG_DATA_HOME` or `~/.local/share`).
#[derive(Debug, Clone)]
pub struct UserDataLayout {
    data_root: PathBuf,
}

impl UserDataLayout {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    #[inline]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// The materialized prefix the application runs against, either the
    /// overlay merged view or a full copy of the template.
    #[inline]
    pub fn prefix_dir(&self) -> PathBuf {
        self.data_root.join("prefix")
    }

    /// Writable upper layer of the overlay.
    #[inline]
    pub fn upper_dir(&self) -> PathBuf {
        self.data_root.join("upper")
    }

    /// fuse-overlayfs scratch directory.
    #[inline]
    pub fn work_dir(&self) -> PathBuf {
        self.data_root.join("work")
    }

    /// Marker written once first-run initialization completed.
    #[inline]
    pub fn initialized_marker(&self) -> PathBuf {
        self.data_root.join(".initialized")
    }

    /// Lock file guarding the mount reference counter.
    #[inline]
    pub fn mount_lock_file(&self) -> PathBuf {
        self.data_root.join(".mount.lock")
    }

    /// Reference count of live launcher instances using the overlay.
    #[inline]
    pub fn mount_count_file(&self) -> PathBuf {
        self.data_root.join(".mount.count")
    }
}
