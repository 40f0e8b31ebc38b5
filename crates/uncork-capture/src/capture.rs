//! Prefix capture: normalize and export a Wine prefix into the intermediate
//! representation consumed by the package builders.
//!
//! The export is atomic from the caller's point of view: everything is
//! written into a hidden staging directory next to the output path and
//! renamed into place as the last step. Any failure drops the staging
//! directory, leaving either a complete tree or nothing.

use crate::analysis::{PrefixAnalysis, PrefixAnalyzer};
use crate::{digest, icons};
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uncork_spec::{
    AppMetadata, Executable, ExeId, InstallConfig, IntermediateLayout, Manifest, ManifestError,
    PackageName, PrefixInfo, TokenError, TokenMap, Tokenizer, WineConfig, SCHEMA_VERSION,
    USER_TOKEN,
};

/// Transient files that never belong in a portable template.
const DEFAULT_EXCLUSIONS: &[&str] = &[
    "*.dxvk-cache",
    "*.log",
    "*.tmp",
    "*.lock",
    "mesa_shader_cache/**",
    "nvidiav1/**",
    "GLCache/**",
    "drive_c/users/*/Temp/**",
    "drive_c/users/*/Local Settings/Temp/**",
    "drive_c/windows/temp/**",
    "drive_c/windows/Temp/**",
    "drive_c/**/CrashDumps/**",
    ".update-timestamp",
];

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("prefix path does not exist: {0}")]
    PrefixNotFound(PathBuf),
    #[error("not a valid Wine prefix (missing drive_c or system.reg): {0}")]
    InvalidPrefix(PathBuf),
    #[error("32-bit-only prefixes are not supported")]
    UnsupportedArch,
    #[error("no executables configured; add at least one entry point")]
    NoExecutables,
    #[error("executable not found in prefix: {0}")]
    ExecutableNotFound(PathBuf),
    #[error("custom icon not found: {0}")]
    CustomIconNotFound(PathBuf),
    #[error("bundled wine path not found: {0}")]
    BundledWineNotFound(PathBuf),
    #[error("output path already exists: {0}")]
    OutputExists(PathBuf),
    #[error("invalid glob pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// One executable entry point to expose from the package.
#[derive(Debug, Clone, Default)]
pub struct ExecutableSpec {
    pub id: String,
    pub name: String,
    /// Path relative to the prefix root.
    pub path: String,
    pub args: String,
    pub description: Option<String>,
    /// Pre-made icon file used instead of extracting from the executable.
    pub custom_icon: Option<PathBuf>,
    pub categories: Vec<String>,
}

struct PendingExecutable {
    exe: Executable,
    custom_icon: Option<PathBuf>,
}

/// Captures and normalizes a Wine prefix for packaging.
pub struct PrefixCapture {
    prefix_path: PathBuf,
    executables: Vec<PendingExecutable>,
    wine: WineConfig,
    bundled_wine_source: Option<PathBuf>,
    app: Option<AppMetadata>,
    install: InstallConfig,
    exclusions: Vec<String>,
    text_globs: Vec<String>,
    analysis: Option<PrefixAnalysis>,
}

impl PrefixCapture {
    pub fn new(prefix_path: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let prefix_path = prefix_path.into();
        if !prefix_path.exists() {
            return Err(CaptureError::PrefixNotFound(prefix_path));
        }
        Ok(Self {
            prefix_path,
            executables: Vec::new(),
            wine: WineConfig::System { min_version: None },
            bundled_wine_source: None,
            app: None,
            install: InstallConfig::default(),
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| (*s).to_owned()).collect(),
            text_globs: Vec::new(),
            analysis: None,
        })
    }

    /// Analyze the prefix, caching the result.
    pub fn analyze(&mut self) -> &PrefixAnalysis {
        if self.analysis.is_none() {
            self.analysis = Some(PrefixAnalyzer::new(&self.prefix_path).analyze());
        }
        self.analysis.as_ref().expect("just populated")
    }

    /// Add an executable entry point. The first one added becomes primary.
    pub fn add_executable(&mut self, spec: ExecutableSpec) -> Result<(), CaptureError> {
        let full_path = self.prefix_path.join(&spec.path);
        if !full_path.exists() {
            return Err(CaptureError::ExecutableNotFound(full_path));
        }
        if let Some(icon) = &spec.custom_icon {
            if !icon.exists() {
                return Err(CaptureError::CustomIconNotFound(icon.clone()));
            }
        }

        let is_primary = self.executables.is_empty();
        self.executables.push(PendingExecutable {
            exe: Executable {
                id: ExeId::new(spec.id),
                name: spec.name,
                path: spec.path,
                args: spec.args,
                working_dir: None,
                icon: None,
                is_primary,
                description: spec.description,
                desktop_entry: true,
                categories: if spec.categories.is_empty() {
                    vec!["Application".to_owned()]
                } else {
                    spec.categories
                },
            },
            custom_icon: spec.custom_icon,
        });
        Ok(())
    }

    /// Depend on a system-installed Wine runtime.
    pub fn set_system_wine(&mut self, min_version: Option<String>) {
        self.wine = WineConfig::System { min_version };
        self.bundled_wine_source = None;
    }

    /// Bundle the Wine installation at `source` into the package.
    pub fn set_bundled_wine(&mut self, source: impl Into<PathBuf>) {
        let source = source.into();
        let name = source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wine".to_owned());
        self.wine = WineConfig::Bundled {
            path: format!("wine/{name}"),
        };
        self.bundled_wine_source = Some(source);
    }

    pub fn set_app_metadata(&mut self, app: AppMetadata) {
        self.app = Some(app);
    }

    pub fn set_install_config(&mut self, install: InstallConfig) {
        self.install = install;
    }

    pub fn add_exclusion(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        if !self.exclusions.contains(&pattern) {
            self.exclusions.push(pattern);
        }
    }

    pub fn remove_exclusion(&mut self, pattern: &str) {
        self.exclusions.retain(|p| p != pattern);
    }

    /// Also tokenize plain-text configuration files matching this glob
    /// (relative to the prefix root), e.g. `drive_c/**/*.ini`.
    pub fn add_text_glob(&mut self, pattern: impl Into<String>) {
        self.text_globs.push(pattern.into());
    }

    /// Export the normalized prefix to `output`.
    ///
    /// Either a complete intermediate tree exists at `output` afterwards, or
    /// nothing does.
    pub fn export(&mut self, output: impl AsRef<Path>) -> Result<Manifest, CaptureError> {
        let output = output.as_ref();

        let analysis = self.analyze().clone();
        if !analysis.is_valid_prefix {
            return Err(CaptureError::InvalidPrefix(self.prefix_path.clone()));
        }
        if analysis.arch == "win32" {
            return Err(CaptureError::UnsupportedArch);
        }
        if self.executables.is_empty() {
            return Err(CaptureError::NoExecutables);
        }
        if output.exists() {
            return Err(CaptureError::OutputExists(output.to_path_buf()));
        }
        for warning in &analysis.warnings {
            warn!("{warning}");
        }

        let exclusions = compile_patterns(&self.exclusions)?;
        let text_globs = compile_patterns(&self.text_globs)?;

        let parent = output.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".uncork-staging-")
            .tempdir_in(parent)?;
        let layout = IntermediateLayout::new(staging.path());

        info!(
            "capturing {} into {}",
            self.prefix_path.display(),
            output.display()
        );

        let template = layout.prefix_template_dir();
        self.copy_prefix(&template, &exclusions)?;

        let token_map = match &analysis.detected_user {
            Some(user) => self.tokenize_template(&template, user, &text_globs)?,
            None => {
                warn!("no user directory detected; paths left untokenized");
                TokenMap::default()
            }
        };
        for warning in &token_map.warnings {
            warn!("{warning}");
        }

        let executables = self.extract_icons(&layout)?;

        if let Some(source) = &self.bundled_wine_source {
            if !source.exists() {
                return Err(CaptureError::BundledWineNotFound(source.clone()));
            }
            let name = source
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| "wine".to_owned());
            copy_dir_recursive(source, &layout.wine_dir().join(name))?;
        }

        let template_digest = digest::hash_tree(&template)?;
        debug!("template digest {}", &template_digest[..12]);

        let app = self.app.clone().unwrap_or_else(|| {
            let first = &self.executables[0].exe;
            AppMetadata {
                name: PackageName::new(sanitize_id(&first.name)),
                display_name: first.name.clone(),
                version: "1.0.0".to_owned(),
                description: "A Windows application packaged for Linux".to_owned(),
                maintainer: None,
                homepage: None,
                license: "Proprietary".to_owned(),
            }
        });

        let manifest = Manifest {
            schema_version: SCHEMA_VERSION,
            app,
            wine: self.wine.clone(),
            prefix: PrefixInfo {
                original_user: analysis
                    .detected_user
                    .clone()
                    .unwrap_or_else(|| "user".to_owned()),
                arch: analysis.arch.clone(),
                wine_version: analysis.wine_version.clone(),
                has_dxvk: analysis.has_dxvk,
                has_vkd3d: analysis.has_vkd3d,
                template_digest: Some(template_digest),
            },
            executables,
            install: self.install.clone(),
            excluded_patterns: self.exclusions.clone(),
        };

        write_launchers(&manifest, &layout.launchers_dir())?;
        manifest.save(staging.path())?;

        std::fs::rename(staging.path(), output)?;
        // The staging TempDir now points at a moved directory; its Drop is a no-op.
        info!("capture complete: {}", output.display());
        Ok(manifest)
    }

    fn copy_prefix(&self, dest: &Path, exclusions: &[Pattern]) -> Result<(), CaptureError> {
        std::fs::create_dir_all(dest)?;
        let mut stack = vec![self.prefix_path.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let src = entry.path();
                let rel = src
                    .strip_prefix(&self.prefix_path)
                    .map_err(|e| std::io::Error::other(format!("path strip: {e}")))?;
                let rel_str = rel.to_string_lossy();
                if matches_any(exclusions, &rel_str) {
                    debug!("excluding {rel_str}");
                    continue;
                }

                let dest_path = dest.join(rel);
                let meta = src.symlink_metadata()?;
                if meta.file_type().is_symlink() {
                    self.copy_symlink(&src, &dest_path, rel)?;
                } else if meta.is_dir() {
                    std::fs::create_dir_all(&dest_path)?;
                    stack.push(src);
                } else {
                    if let Some(parent) = dest_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&src, &dest_path)?;
                }
            }
        }
        Ok(())
    }

    /// Symlink policy: `c:` is rewritten to a relative link, `z:` is dropped
    /// (the launcher recreates it pointing at `/`), and any link with an
    /// absolute target is dropped since it would dangle on the target system.
    fn copy_symlink(&self, src: &Path, dest: &Path, rel: &Path) -> Result<(), CaptureError> {
        let target = std::fs::read_link(src)?;
        let in_dosdevices = rel
            .components()
            .any(|c| c.as_os_str().to_string_lossy() == "dosdevices");

        let link_name = src
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        if in_dosdevices && link_name == "c:" {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink("../drive_c", dest)?;
            return Ok(());
        }
        if in_dosdevices && link_name == "z:" {
            return Ok(());
        }
        if target.is_absolute() {
            debug!("dropping absolute symlink {} -> {}", rel.display(), target.display());
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(&target, dest)?;
        Ok(())
    }

    fn tokenize_template(
        &self,
        template: &Path,
        user: &str,
        text_globs: &[Pattern],
    ) -> Result<TokenMap, CaptureError> {
        let tokenizer = Tokenizer::new(user)?;
        let mut map = TokenMap::default();

        for reg in ["system.reg", "user.reg", "userdef.reg"] {
            let path = template.join(reg);
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let rewritten = tokenizer.tokenize_registry(&content, &mut map)?;
                    std::fs::write(&path, rewritten)?;
                }
                Err(_) => {
                    // Unparseable content degrades to a warning; most of the
                    // capture is still portable.
                    warn!("registry file {reg} is not valid UTF-8; left untouched");
                }
            }
        }

        if !text_globs.is_empty() {
            for rel in collect_files(template)? {
                let rel_str = rel.to_string_lossy();
                if !matches_any(text_globs, &rel_str) {
                    continue;
                }
                let path = template.join(&rel);
                match std::fs::read_to_string(&path) {
                    Ok(content) => {
                        let rewritten = tokenizer.tokenize_text(&content, &mut map)?;
                        std::fs::write(&path, rewritten)?;
                    }
                    Err(_) => warn!("config file {rel_str} is not valid UTF-8; left untouched"),
                }
            }
        }

        let users_dir = template.join("drive_c/users");
        let old_user_dir = users_dir.join(user);
        let new_user_dir = users_dir.join(USER_TOKEN);
        if old_user_dir.exists() && !new_user_dir.exists() {
            std::fs::rename(&old_user_dir, &new_user_dir)?;
        }

        Ok(map)
    }

    /// Extract or copy one icon per executable. A failed extraction is a
    /// warning, not a capture failure.
    fn extract_icons(&self, layout: &IntermediateLayout) -> Result<Vec<Executable>, CaptureError> {
        let icons_dir = layout.icons_dir();
        std::fs::create_dir_all(&icons_dir)?;

        let mut result = Vec::with_capacity(self.executables.len());
        for pending in &self.executables {
            let mut exe = pending.exe.clone();
            let icon_path = icons_dir.join(format!("{}.png", exe.id));

            let extracted = if let Some(custom) = &pending.custom_icon {
                std::fs::copy(custom, &icon_path).map(|_| ()).map_err(|e| {
                    warn!("copying custom icon for '{}' failed: {e}", exe.id);
                })
            } else {
                icons::extract_icon(&self.prefix_path.join(&exe.path), &icon_path).map_err(|e| {
                    warn!("icon extraction for '{}' failed: {e}", exe.id);
                })
            };

            exe.icon = extracted.ok().map(|()| format!("icons/{}.png", exe.id));
            result.push(exe);
        }
        Ok(result)
    }
}

/// Materialize the generated entry-point scripts and desktop files under
/// `launchers/` so the intermediate tree is inspectable on its own. Builders
/// regenerate from the manifest (the single source of truth) at stage time.
fn write_launchers(manifest: &Manifest, launchers_dir: &Path) -> Result<(), CaptureError> {
    use std::os::unix::fs::PermissionsExt;

    for file in uncork_runtime::launcher::generate_all(manifest) {
        let dest = launchers_dir.join(&file.rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &file.content)?;
        if file.executable {
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

/// Sanitize a display name into an id/package-name candidate.
pub fn sanitize_id(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_owned()
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, CaptureError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| CaptureError::BadPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

fn matches_any(patterns: &[Pattern], rel: &str) -> bool {
    // `*` is allowed to cross `/` so `*.log` excludes logs at any depth,
    // matching the exclusion semantics the manifest records.
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    patterns.iter().any(|p| p.matches_with(rel, options))
}

fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = path.symlink_metadata()?;
            if meta.is_dir() {
                stack.push(path);
            } else if meta.is_file() {
                if let Ok(rel) = path.strip_prefix(root) {
                    files.push(rel.to_path_buf());
                }
            }
        }
    }
    Ok(files)
}

/// Recursively copy a directory tree, preserving symlinks.
fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
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
            copy_dir_recursive(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
