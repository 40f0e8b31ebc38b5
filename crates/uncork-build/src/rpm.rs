//! RPM package builder.
//!
//! RPM assembly is delegated entirely to external tools: `fpm` when present
//! (simpler invocation), `rpmbuild` with a generated spec file otherwise.
//! With neither installed the build fails up front with install hints.

use crate::archive;
use crate::builder::{BuildContext, FormatBuilder, PackageFormat};
use crate::BuildError;
use std::fmt::Write as _;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use uncork_runtime::launcher;
use uncork_runtime::prereq::command_exists;
use uncork_spec::{Manifest, WineConfig};

pub struct RpmBuilder;

impl RpmBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RpmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatBuilder for RpmBuilder {
    fn format(&self) -> PackageFormat {
        PackageFormat::Rpm
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
        if command_exists("fpm") {
            build_with_fpm(ctx)
        } else if command_exists("rpmbuild") {
            build_with_rpmbuild(ctx)
        } else {
            Err(BuildError::ToolMissing {
                tool: "fpm or rpmbuild".to_owned(),
                hint: "gem install fpm | dnf install rpm-build | apt install rpm".to_owned(),
            })
        }
    }
}

fn build_with_fpm(ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
    debug!("building {} with fpm", ctx.output_path.display());
    let manifest = ctx.manifest;

    let scripts_dir = tempfile::Builder::new().prefix("uncork-rpm-scripts-").tempdir()?;
    let after_install = write_script(
        &scripts_dir.path().join("after-install.sh"),
        &format!("#!/bin/sh\n{}", launcher::generate_postinstall_hook()),
    )?;
    let after_remove = write_script(
        &scripts_dir.path().join("after-remove.sh"),
        &format!("#!/bin/sh\n{}", launcher::generate_postinstall_hook()),
    )?;

    let mut cmd = Command::new("fpm");
    cmd.args(["-s", "dir", "-t", "rpm"])
        .args(["-n", manifest.app.name.as_str()])
        .args(["-v", &manifest.app.version])
        .args(["--description", &manifest.app.description])
        .args(["--architecture", "x86_64"])
        .args(["--license", &manifest.app.license])
        .arg("-p")
        .arg(ctx.output_path);

    if matches!(manifest.wine, WineConfig::System { .. }) {
        cmd.args(["-d", "wine"]);
    }
    if manifest.install.use_overlay {
        cmd.args(["-d", "fuse-overlayfs"]);
        let before_remove = write_script(
            &scripts_dir.path().join("before-remove.sh"),
            &format!("#!/bin/sh\n{}\nexit 0\n", launcher::generate_preremove_hook(manifest)),
        )?;
        cmd.arg("--before-remove").arg(before_remove);
    }
    if let Some(homepage) = &manifest.app.homepage {
        cmd.args(["--url", homepage]);
    }
    if let Some(maintainer) = &manifest.app.maintainer {
        cmd.args(["--maintainer", maintainer]);
    }

    cmd.arg("--after-install")
        .arg(after_install)
        .arg("--after-remove")
        .arg(after_remove)
        .arg("-C")
        .arg(ctx.staging_dir)
        .arg(".");

    let output = cmd.output().map_err(|e| BuildError::ToolFailed {
        tool: "fpm".to_owned(),
        detail: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(BuildError::ToolFailed {
            tool: "fpm".to_owned(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(ctx.output_path.to_path_buf())
}

fn build_with_rpmbuild(ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
    debug!("building {} with rpmbuild", ctx.output_path.display());
    let manifest = ctx.manifest;

    let topdir = tempfile::Builder::new().prefix("uncork-rpmbuild-").tempdir()?;
    for subdir in ["BUILD", "RPMS", "SOURCES", "SPECS", "SRPMS"] {
        std::fs::create_dir_all(topdir.path().join(subdir))?;
    }

    let source_name = format!("{}-{}", manifest.app.name, manifest.app.version);
    let tar = archive::pack_tree(ctx.staging_dir, &[], &[], &format!("{source_name}/"))?;
    let tar_gz = archive::gzip(&tar)?;
    std::fs::write(
        topdir.path().join("SOURCES").join(format!("{source_name}.tar.gz")),
        tar_gz,
    )?;

    let spec_content = generate_spec_file(manifest, ctx.staging_dir, &source_name);
    let spec_path = topdir
        .path()
        .join("SPECS")
        .join(format!("{}.spec", manifest.app.name));
    std::fs::write(&spec_path, spec_content)?;

    let output = Command::new("rpmbuild")
        .arg("-bb")
        .arg(format!("--define=_topdir {}", topdir.path().display()))
        .arg(&spec_path)
        .output()
        .map_err(|e| BuildError::ToolFailed {
            tool: "rpmbuild".to_owned(),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(BuildError::ToolFailed {
            tool: "rpmbuild".to_owned(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    let rpms_dir = topdir.path().join("RPMS/x86_64");
    for entry in std::fs::read_dir(&rpms_dir)? {
        let entry = entry?;
        if entry.path().extension().is_some_and(|e| e == "rpm") {
            std::fs::copy(entry.path(), ctx.output_path)?;
            return Ok(ctx.output_path.to_path_buf());
        }
    }
    Err(BuildError::ToolFailed {
        tool: "rpmbuild".to_owned(),
        detail: "no RPM produced under RPMS/x86_64".to_owned(),
    })
}

fn generate_spec_file(manifest: &Manifest, staging_dir: &Path, source_name: &str) -> String {
    let mut requires = String::new();
    if matches!(manifest.wine, WineConfig::System { .. }) {
        let _ = writeln!(requires, "Requires:       wine");
    }
    if manifest.install.use_overlay {
        let _ = writeln!(requires, "Requires:       fuse-overlayfs");
    }

    let mut s = String::new();
    let _ = writeln!(s, "Name:           {}", manifest.app.name);
    let _ = writeln!(s, "Version:        {}", manifest.app.version);
    let _ = writeln!(s, "Release:        1%{{?dist}}");
    let _ = writeln!(s, "Summary:        {}", manifest.app.display_name);
    let _ = writeln!(s);
    let _ = writeln!(s, "License:        {}", manifest.app.license);
    let _ = writeln!(
        s,
        "URL:            {}",
        manifest.app.homepage.as_deref().unwrap_or("")
    );
    let _ = writeln!(s, "Source0:        {source_name}.tar.gz");
    let _ = writeln!(s);
    let _ = writeln!(s, "BuildArch:      x86_64");
    s.push_str(&requires);
    let _ = writeln!(s);
    let _ = writeln!(s, "%description");
    let _ = writeln!(s, "{}", manifest.app.description);
    let _ = writeln!(s);
    let _ = writeln!(s, "This is a Windows application packaged to run via Wine.");
    let _ = writeln!(s);
    let _ = writeln!(s, "%prep");
    let _ = writeln!(s, "%setup -q");
    let _ = writeln!(s);
    let _ = writeln!(s, "%install");
    let _ = writeln!(s, "mkdir -p %{{buildroot}}");
    let _ = writeln!(s, "cp -r * %{{buildroot}}/");
    let _ = writeln!(s);
    let _ = writeln!(s, "%post");
    s.push_str(&launcher::generate_postinstall_hook());
    let _ = writeln!(s);
    if manifest.install.use_overlay {
        let _ = writeln!(s, "%preun");
        s.push_str(&launcher::generate_preremove_hook(manifest));
        let _ = writeln!(s, "exit 0");
        let _ = writeln!(s);
    }
    let _ = writeln!(s, "%postun");
    s.push_str(&launcher::generate_postinstall_hook());
    let _ = writeln!(s);
    let _ = writeln!(s, "%files");
    let _ = writeln!(s, "{}", manifest.system_path());
    for (dir, pattern) in [
        ("usr/bin", "/usr/bin/*"),
        ("usr/share/applications", "/usr/share/applications/*.desktop"),
        ("usr/share/icons", "/usr/share/icons/hicolor/*/apps/*"),
    ] {
        if staging_dir.join(dir).exists() {
            let _ = writeln!(s, "{pattern}");
        }
    }
    s
}

fn write_script(path: &Path, content: &str) -> Result<PathBuf, BuildError> {
    let mut f = std::fs::File::create(path)?;
    f.write_all(content.as_bytes())?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path.to_path_buf())
}
