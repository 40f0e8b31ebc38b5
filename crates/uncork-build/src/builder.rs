//! Format registry and the top-level build entry point.

use crate::stage::stage_tree;
use crate::BuildError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;
use uncork_spec::{IntermediateLayout, Manifest};

/// Target package format. The `Dir` format stages the installed tree into a
/// plain directory for inspection and testing; it needs no external tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Deb,
    Pacman,
    Rpm,
    Dir,
}

impl PackageFormat {
    pub const ALL: [Self; 4] = [Self::Deb, Self::Pacman, Self::Rpm, Self::Dir];

    /// Conventional artifact file name for a manifest.
    pub fn artifact_file_name(self, manifest: &Manifest) -> String {
        let name = &manifest.app.name;
        let version = &manifest.app.version;
        match self {
            Self::Deb => format!("{name}_{version}_amd64.deb"),
            Self::Pacman => format!("{name}-{version}-1-x86_64.pkg.tar.zst"),
            Self::Rpm => format!("{name}-{version}-1.x86_64.rpm"),
            Self::Dir => format!("{name}-{version}"),
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deb => "deb",
            Self::Pacman => "pacman",
            Self::Rpm => "rpm",
            Self::Dir => "dir",
        };
        f.write_str(s)
    }
}

impl FromStr for PackageFormat {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deb" => Ok(Self::Deb),
            "pacman" | "arch" => Ok(Self::Pacman),
            "rpm" => Ok(Self::Rpm),
            "dir" | "directory" => Ok(Self::Dir),
            other => Err(BuildError::UnknownFormat(other.to_owned())),
        }
    }
}

/// Inputs shared by every format builder: the manifest, the fully staged
/// installed tree, and the artifact destination.
pub struct BuildContext<'a> {
    pub manifest: &'a Manifest,
    pub staging_dir: &'a Path,
    pub output_path: &'a Path,
}

/// One implementation per target format, selected through [`select_builder`].
pub trait FormatBuilder {
    fn format(&self) -> PackageFormat;

    /// Produce the artifact at `ctx.output_path` and return its path.
    fn build(&self, ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError>;
}

pub fn select_builder(format: PackageFormat) -> Box<dyn FormatBuilder> {
    match format {
        PackageFormat::Deb => Box::new(crate::deb::DebBuilder::new()),
        PackageFormat::Pacman => Box::new(crate::pacman::PacmanBuilder::new()),
        PackageFormat::Rpm => Box::new(crate::rpm::RpmBuilder::new()),
        PackageFormat::Dir => Box::new(DirBuilder),
    }
}

/// Build one artifact: stage the installed tree, then hand it to the
/// format's builder. A failed build removes any partial artifact.
pub fn build(
    format: PackageFormat,
    manifest: &Manifest,
    intermediate: &IntermediateLayout,
    output_dir: &Path,
) -> Result<PathBuf, BuildError> {
    manifest.validate()?;
    std::fs::create_dir_all(output_dir)?;
    let output_path = output_dir.join(format.artifact_file_name(manifest));

    let staging = tempfile::Builder::new().prefix("uncork-build-").tempdir()?;
    stage_tree(manifest, intermediate, staging.path())?;

    let builder = select_builder(format);
    let ctx = BuildContext {
        manifest,
        staging_dir: staging.path(),
        output_path: &output_path,
    };

    info!("building {} artifact: {}", format, output_path.display());
    match builder.build(&ctx) {
        Ok(path) => Ok(path),
        Err(e) => {
            if output_path.is_dir() {
                let _ = std::fs::remove_dir_all(&output_path);
            } else if output_path.exists() {
                let _ = std::fs::remove_file(&output_path);
            }
            Err(e)
        }
    }
}

/// Stages into a plain directory, for inspection and tests.
struct DirBuilder;

impl FormatBuilder for DirBuilder {
    fn format(&self) -> PackageFormat {
        PackageFormat::Dir
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<PathBuf, BuildError> {
        if ctx.output_path.exists() {
            std::fs::remove_dir_all(ctx.output_path)?;
        }
        copy_tree(ctx.staging_dir, ctx.output_path)?;
        Ok(ctx.output_path.to_path_buf())
    }
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
