//! Debian package builder.
//!
//! Prefers `dpkg-deb` when present; otherwise assembles the `.deb` manually
//! (an `ar` archive of `debian-binary`, `control.tar.gz`, `data.tar.gz`).
//! Both paths produce deterministic output: staged mtimes are clamped, tar
//! headers are normalized, and the ar members carry epoch timestamps.

use crate::archive;
use crate::builder::{BuildContext, FormatBuilder, PackageFormat};
use crate::BuildError;
use std::fmt::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use uncork_runtime::launcher;
use uncork_spec::{Manifest, WineConfig};

/// Dependency alternatives accepted for a system Wine runtime on Debian.
const WINE_ALTERNATIVES: &str = "wine | wine-stable | wine-staging | winehq-stable | winehq-staging";

pub struct DebBuilder {
    force_manual: bool,
}

impl DebBuilder {
    pub fn new() -> Self {
        Self {
            force_manual: false,
        }
    }

    /// Always use the manual ar assembly, never `dpkg-deb`.
    pub fn manual() -> Self {
        Self { force_manual: true }
    }
}

impl Default for DebBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatBuilder for DebBuilder {
    fn format(&self) -> PackageFormat {
        PackageFormat::Deb
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
        write_debian_dir(ctx.manifest, ctx.staging_dir)?;

        if !self.force_manual && uncork_runtime::prereq::command_exists("dpkg-deb") {
            build_with_dpkg(ctx)
        } else {
            build_manual(ctx)
        }
    }
}

fn write_debian_dir(manifest: &Manifest, staging_dir: &Path) -> Result<(), BuildError> {
    let debian_dir = staging_dir.join("DEBIAN");
    std::fs::create_dir_all(&debian_dir)?;

    std::fs::write(debian_dir.join("control"), generate_control(manifest, staging_dir))?;

    write_script(&debian_dir.join("postinst"), &generate_postinst())?;
    write_script(&debian_dir.join("postrm"), &generate_postrm())?;
    if manifest.install.use_overlay {
        write_script(&debian_dir.join("prerm"), &generate_prerm(manifest))?;
    }

    // Clamp the control files too so dpkg-deb sees stable metadata.
    let epoch = std::time::SystemTime::UNIX_EPOCH;
    for entry in std::fs::read_dir(&debian_dir)? {
        if let Ok(f) = std::fs::File::options().append(true).open(entry?.path()) {
            let _ = f.set_modified(epoch);
        }
    }
    if let Ok(f) = std::fs::File::open(&debian_dir) {
        let _ = f.set_modified(epoch);
    }
    Ok(())
}

fn write_script(path: &Path, content: &str) -> Result<(), BuildError> {
    std::fs::write(path, content)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn generate_control(manifest: &Manifest, staging_dir: &Path) -> String {
    let mut depends: Vec<String> = Vec::new();
    if matches!(manifest.wine, WineConfig::System { .. }) {
        depends.push(WINE_ALTERNATIVES.to_owned());
    }
    if manifest.install.use_overlay {
        depends.push("fuse-overlayfs".to_owned());
    }
    let recommends = "libvulkan1, mesa-vulkan-drivers | nvidia-vulkan-icd";

    let installed_size_kb = tree_size(staging_dir) / 1024;
    let maintainer = manifest
        .app
        .maintainer
        .as_deref()
        .unwrap_or("Unknown <unknown@example.com>");

    let mut control = String::new();
    let _ = writeln!(control, "Package: {}", manifest.app.name);
    let _ = writeln!(control, "Version: {}", manifest.app.version);
    let _ = writeln!(control, "Section: misc");
    let _ = writeln!(control, "Priority: optional");
    let _ = writeln!(control, "Architecture: amd64");
    let _ = writeln!(control, "Installed-Size: {installed_size_kb}");
    let _ = writeln!(control, "Maintainer: {maintainer}");
    if !depends.is_empty() {
        let _ = writeln!(control, "Depends: {}", depends.join(", "));
    }
    let _ = writeln!(control, "Recommends: {recommends}");
    if let Some(homepage) = &manifest.app.homepage {
        let _ = writeln!(control, "Homepage: {homepage}");
    }
    let _ = writeln!(control, "Description: {}", manifest.app.display_name);
    let _ = writeln!(control, " {}", manifest.app.description);
    let _ = writeln!(control, " .");
    let _ = writeln!(control, " This is a Windows application packaged to run via Wine.");
    control
}

fn generate_postinst() -> String {
    format!(
        "#!/bin/sh\nset -e\n\n{}\nexit 0\n",
        launcher::generate_postinstall_hook()
    )
}

fn generate_prerm(manifest: &Manifest) -> String {
    // Deliberately no `set -e`: removal must complete even if unmounting
    // partially fails.
    format!(
        "#!/bin/sh\n\n{}\nexit 0\n",
        launcher::generate_preremove_hook(manifest)
    )
}

fn generate_postrm() -> String {
    format!(
        "#!/bin/sh\nset -e\n\n{}\nexit 0\n",
        launcher::generate_postinstall_hook()
    )
}

fn build_with_dpkg(ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
    debug!("building {} with dpkg-deb", ctx.output_path.display());
    let output = Command::new("dpkg-deb")
        .args(["--build", "--root-owner-group"])
        .arg(ctx.staging_dir)
        .arg(ctx.output_path)
        .env("SOURCE_DATE_EPOCH", "0")
        .output()
        .map_err(|e| BuildError::ToolFailed {
            tool: "dpkg-deb".to_owned(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(BuildError::ToolFailed {
            tool: "dpkg-deb".to_owned(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(ctx.output_path.to_path_buf())
}

fn build_manual(ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
    debug!("building {} manually", ctx.output_path.display());
    let control_tar = archive::pack_tree(&ctx.staging_dir.join("DEBIAN"), &[], &[], "./")?;
    let control_gz = archive::gzip(&control_tar)?;

    let data_tar = archive::pack_tree(ctx.staging_dir, &[], &["DEBIAN"], "./")?;
    let data_gz = archive::gzip(&data_tar)?;

    archive::write_ar(
        ctx.output_path,
        &[
            ("debian-binary", b"2.0\n"),
            ("control.tar.gz", &control_gz),
            ("data.tar.gz", &data_gz),
        ],
    )?;
    Ok(ctx.output_path.to_path_buf())
}

fn tree_size(root: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.path().symlink_metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                total += meta.len();
            }
        }
    }
    total
}
