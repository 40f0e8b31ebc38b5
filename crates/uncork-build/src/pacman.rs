//! Arch Linux package builder (`.pkg.tar.zst`).
//!
//! Prefers `bsdtar --zstd` when present; otherwise packs with the
//! deterministic tar layer and the zstd library. `.PKGINFO` leads the
//! archive, followed by `.INSTALL` and the sorted file tree.

use crate::archive;
use crate::builder::{BuildContext, FormatBuilder, PackageFormat};
use crate::BuildError;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use uncork_runtime::launcher;
use uncork_spec::{Manifest, WineConfig};

/// Compression level for the library fallback; matches `makepkg`'s defaults
/// for release packages.
const ZSTD_LEVEL: i32 = 19;

pub struct PacmanBuilder {
    force_fallback: bool,
}

impl PacmanBuilder {
    pub fn new() -> Self {
        Self {
            force_fallback: false,
        }
    }

    /// Always use the library tar+zstd path, never `bsdtar`.
    pub fn fallback() -> Self {
        Self {
            force_fallback: true,
        }
    }
}

impl Default for PacmanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatBuilder for PacmanBuilder {
    fn format(&self) -> PackageFormat {
        PackageFormat::Pacman
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
        std::fs::write(
            ctx.staging_dir.join(".PKGINFO"),
            generate_pkginfo(ctx.manifest, ctx.staging_dir),
        )?;
        std::fs::write(
            ctx.staging_dir.join(".INSTALL"),
            generate_install_script(ctx.manifest),
        )?;
        clamp_mtime(&ctx.staging_dir.join(".PKGINFO"));
        clamp_mtime(&ctx.staging_dir.join(".INSTALL"));

        if !self.force_fallback && uncork_runtime::prereq::command_exists("bsdtar") {
            build_with_bsdtar(ctx)
        } else {
            build_with_library(ctx)
        }
    }
}

fn generate_pkginfo(manifest: &Manifest, staging_dir: &Path) -> String {
    let installed_size: u64 = tree_size(staging_dir);
    let packager = manifest
        .app
        .maintainer
        .as_deref()
        .unwrap_or("Unknown Packager <unknown@example.com>");

    let mut info = String::new();
    let _ = writeln!(info, "pkgname = {}", manifest.app.name);
    let _ = writeln!(info, "pkgver = {}-1", manifest.app.version);
    let _ = writeln!(info, "pkgdesc = {}", manifest.app.description);
    let _ = writeln!(info, "url = {}", manifest.app.homepage.as_deref().unwrap_or(""));
    // Fixed build date keeps artifacts byte-reproducible.
    let _ = writeln!(info, "builddate = 0");
    let _ = writeln!(info, "packager = {packager}");
    let _ = writeln!(info, "size = {installed_size}");
    let _ = writeln!(info, "arch = x86_64");
    let _ = writeln!(info, "license = {}", manifest.app.license);

    if matches!(manifest.wine, WineConfig::System { .. }) {
        let _ = writeln!(info, "depend = wine");
    }
    if manifest.install.use_overlay {
        let _ = writeln!(info, "depend = fuse-overlayfs");
    }
    let _ = writeln!(info, "optdepend = winetricks: for additional Windows components");
    let _ = writeln!(info, "optdepend = vulkan-icd-loader: for Vulkan/DXVK support");
    let _ = writeln!(
        info,
        "optdepend = lib32-vulkan-icd-loader: for Vulkan/DXVK support"
    );
    info
}

fn generate_install_script(manifest: &Manifest) -> String {
    let refresh = launcher::generate_postinstall_hook();
    let mut script = String::new();
    let _ = writeln!(script, "post_install() {{");
    push_indented(&mut script, &refresh);
    let _ = writeln!(script, "}}");
    let _ = writeln!(script);
    let _ = writeln!(script, "post_upgrade() {{");
    let _ = writeln!(script, "    post_install");
    let _ = writeln!(script, "}}");
    let _ = writeln!(script);

    if manifest.install.use_overlay {
        let _ = writeln!(script, "pre_remove() {{");
        push_indented(&mut script, &launcher::generate_preremove_hook(manifest));
        let _ = writeln!(script, "}}");
        let _ = writeln!(script);
    }

    let _ = writeln!(script, "post_remove() {{");
    push_indented(&mut script, &refresh);
    let _ = writeln!(script, "}}");
    script
}

fn push_indented(out: &mut String, body: &str) {
    for line in body.lines() {
        if line.is_empty() {
            out.push('\n');
        } else {
            let _ = writeln!(out, "    {line}");
        }
    }
}

fn build_with_bsdtar(ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
    debug!("building {} with bsdtar", ctx.output_path.display());

    let mut files = vec![".PKGINFO".to_owned(), ".INSTALL".to_owned()];
    let mut rest: Vec<String> = std::fs::read_dir(ctx.staging_dir)?
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != ".PKGINFO" && n != ".INSTALL")
        .collect();
    rest.sort();
    files.extend(rest);

    let output = Command::new("bsdtar")
        .arg("-cf")
        .arg(ctx.output_path)
        .args(["--zstd", "--uid", "0", "--gid", "0", "--numeric-owner"])
        .arg("-C")
        .arg(ctx.staging_dir)
        .args(&files)
        .output()
        .map_err(|e| BuildError::ToolFailed {
            tool: "bsdtar".to_owned(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(BuildError::ToolFailed {
            tool: "bsdtar".to_owned(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(ctx.output_path.to_path_buf())
}

fn build_with_library(ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
    debug!("building {} with tar+zstd", ctx.output_path.display());
    let tar = archive::pack_tree(ctx.staging_dir, &[".PKGINFO", ".INSTALL"], &[], "")?;
    let compressed = archive::zstd_compress(&tar, ZSTD_LEVEL)?;
    std::fs::write(ctx.output_path, compressed)?;
    Ok(ctx.output_path.to_path_buf())
}

fn clamp_mtime(path: &Path) {
    if let Ok(f) = std::fs::File::options().append(true).open(path) {
        let _ = f.set_modified(std::time::SystemTime::UNIX_EPOCH);
    }
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
