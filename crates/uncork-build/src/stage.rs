//! Shared staging: lay out the installed filesystem tree exactly as it will
//! appear on the target system, ready for any format builder to archive.

use crate::BuildError;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uncork_runtime::launcher::{command_name, generate_all};
use uncork_spec::{IntermediateLayout, Manifest, WineConfig, MANIFEST_FILE};

pub fn stage_tree(
    manifest: &Manifest,
    intermediate: &IntermediateLayout,
    staging_root: &Path,
) -> Result<(), BuildError> {
    let system_path = manifest.system_path();
    let install_dir = staging_root.join(system_path.trim_start_matches('/'));
    std::fs::create_dir_all(&install_dir)?;

    let template_src = intermediate.prefix_template_dir();
    if !template_src.exists() {
        return Err(BuildError::MissingInput(template_src));
    }
    let manifest_src = intermediate.manifest_path();
    if !manifest_src.exists() {
        return Err(BuildError::MissingInput(manifest_src));
    }

    debug!("staging {} into {}", manifest.app.name, install_dir.display());
    copy_tree(&template_src, &install_dir.join("prefix-template"))?;

    if let WineConfig::Bundled { path } = &manifest.wine {
        let src = intermediate.root().join(path);
        if !src.exists() {
            return Err(BuildError::MissingInput(src));
        }
        copy_tree(&src, &install_dir.join(path))?;
    }

    let icons_src = intermediate.icons_dir();
    if icons_src.exists() {
        copy_tree(&icons_src, &install_dir.join("icons"))?;
    }

    for file in generate_all(manifest) {
        let dest = if file.rel_path.starts_with("share/") {
            staging_root.join("usr").join(&file.rel_path)
        } else {
            install_dir.join(&file.rel_path)
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &file.content)?;
        if file.executable {
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
        }
    }

    let usr_bin = staging_root.join("usr/bin");
    std::fs::create_dir_all(&usr_bin)?;
    for exe in &manifest.executables {
        let command = command_name(manifest, exe);
        let target = format!("{system_path}/bin/{}", exe.id);
        std::os::unix::fs::symlink(&target, usr_bin.join(&command))?;
    }

    for exe in &manifest.executables {
        let Some(icon_rel) = &exe.icon else { continue };
        let icon_src = intermediate.root().join(icon_rel);
        if !icon_src.exists() {
            continue;
        }
        let command = command_name(manifest, exe);
        let dest_dir = staging_root.join("usr/share/icons/hicolor/256x256/apps");
        std::fs::create_dir_all(&dest_dir)?;
        std::fs::copy(&icon_src, dest_dir.join(format!("{command}.png")))?;
    }

    std::fs::copy(&manifest_src, install_dir.join(MANIFEST_FILE))?;

    normalize_mtimes(staging_root)?;
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let meta = from.symlink_metadata()?;
        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&from)?;
            std::os::unix::fs::symlink(target, &to)?;
        } else if meta.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Clamp every mtime under `root` to the epoch so external archivers
/// (dpkg-deb, bsdtar) see identical metadata across rebuilds.
fn normalize_mtimes(root: &Path) -> std::io::Result<()> {
    let epoch = std::time::SystemTime::UNIX_EPOCH;
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = path.symlink_metadata()?;
            if meta.file_type().is_symlink() {
                continue;
            }
            if meta.is_dir() {
                dirs.push(path.clone());
                stack.push(path);
            } else if let Ok(f) = std::fs::File::options().append(true).open(&path) {
                let _ = f.set_modified(epoch);
            }
        }
    }
    // Children first, so setting a parent's mtime is not undone.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    dirs.push(root.to_path_buf());
    for dir in dirs {
        if let Ok(f) = std::fs::File::open(&dir) {
            let _ = f.set_modified(epoch);
        }
    }
    Ok(())
}
