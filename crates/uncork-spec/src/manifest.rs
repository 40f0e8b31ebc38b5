use crate::types::{ExeId, PackageName};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// File name of the manifest at the intermediate tree root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current manifest schema version. Higher versions are rejected on load;
/// unknown *fields* within the current version are ignored so newer builders
/// can add data without breaking older readers.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("unsupported schema_version: {0}, expected {SCHEMA_VERSION}")]
    UnsupportedVersion(u32),
    #[error("app.name must not be empty")]
    EmptyAppName,
    #[error("invalid app.name '{0}': expected lowercase letters, digits, '-', '.', '+'")]
    InvalidAppName(String),
    #[error("invalid app.version '{0}'")]
    InvalidVersion(String),
    #[error("duplicate executable id: {0}")]
    DuplicateExecutableId(String),
    #[error("executable '{id}' path escapes the prefix: {path}")]
    PathEscapesPrefix { id: String, path: String },
    #[error("no executable is marked primary")]
    NoPrimaryExecutable,
    #[error("more than one executable is marked primary")]
    MultiplePrimaryExecutables,
    #[error("install.system_path must be absolute: {0}")]
    RelativeSystemPath(String),
    #[error("bundled wine path must be relative to the intermediate tree: {0}")]
    AbsoluteBundledPath(String),
}

/// Application metadata carried into every built package.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppMetadata {
    pub name: PackageName,
    pub display_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default = "default_license")]
    pub license: String,
}

/// An executable entry point inside the captured prefix.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Executable {
    pub id: ExeId,
    /// Human-readable name for menus and launchers.
    pub name: String,
    /// Path relative to the prefix root, e.g. `drive_c/Program Files/App/app.exe`.
    pub path: String,
    #[serde(default)]
    pub args: String,
    /// Working directory relative to the prefix; defaults to the executable's parent.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Icon path relative to the intermediate tree, set during capture.
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub desktop_entry: bool,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

impl Executable {
    /// The effective working directory, relative to the prefix root.
    pub fn effective_working_dir(&self) -> String {
        match &self.working_dir {
            Some(dir) => dir.clone(),
            None => Path::new(&self.path)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Wine deployment strategy: a closed variant, never silently coerced.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum WineConfig {
    /// Depend on a Wine runtime installed on the target system.
    System {
        #[serde(default)]
        min_version: Option<String>,
    },
    /// Ship a Wine/Proton tree inside the package; declare no dependency.
    Bundled {
        /// Path relative to the intermediate tree, e.g. `wine/wine-9.0`.
        path: String,
    },
}

impl WineConfig {
    pub fn is_bundled(&self) -> bool {
        matches!(self, Self::Bundled { .. })
    }
}

/// Installation path configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct InstallConfig {
    /// Read-only application root, `{name}` substituted with `app.name`.
    #[serde(default = "default_system_path")]
    pub system_path: String,
    /// Per-user data root template, resolved at first run.
    #[serde(default = "default_user_data_path")]
    pub user_data_path: String,
    /// Mount the template with fuse-overlayfs instead of copying it.
    #[serde(default)]
    pub use_overlay: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            system_path: default_system_path(),
            user_data_path: default_user_data_path(),
            use_overlay: false,
        }
    }
}

/// Metadata about the captured prefix, recorded for diagnostics and
/// first-run resolution.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PrefixInfo {
    /// Username detected in the source prefix, replaced by the user token.
    pub original_user: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub wine_version: Option<String>,
    #[serde(default)]
    pub has_dxvk: bool,
    #[serde(default)]
    pub has_vkd3d: bool,
    /// Content digest of the normalized prefix template.
    #[serde(default)]
    pub template_digest: Option<String>,
}

/// The package manifest: single source of truth for the launcher runtime and
/// every package builder. Serialized as `manifest.json` at the intermediate
/// tree root.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub app: AppMetadata,
    pub wine: WineConfig,
    pub prefix: PrefixInfo,
    #[serde(default)]
    pub executables: Vec<Executable>,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
}

impl Manifest {
    /// Load and validate a manifest from `manifest.json`, or from a directory
    /// containing one.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        let content = fs::read_to_string(&file)?;
        let manifest: Self = serde_json::from_str(&content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Atomically write the manifest to `manifest.json` inside `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ManifestError> {
        self.validate()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let dest = dir.join(MANIFEST_FILE);
        let content = serde_json::to_string_pretty(self)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| ManifestError::Io(e.error))?;
        crate::fsync_dir(dir)?;
        Ok(dest)
    }

    /// Validate all structural invariants. Called by both `load` and `save`.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ManifestError::UnsupportedVersion(self.schema_version));
        }

        let name = self.app.name.as_str();
        if name.is_empty() {
            return Err(ManifestError::EmptyAppName);
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'.' | b'+'))
            || !name.as_bytes()[0].is_ascii_alphanumeric()
        {
            return Err(ManifestError::InvalidAppName(name.to_owned()));
        }

        let version = &self.app.version;
        if version.is_empty()
            || !version
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'+' | b'~' | b'-'))
        {
            return Err(ManifestError::InvalidVersion(version.clone()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for exe in &self.executables {
            if !seen.insert(exe.id.as_str()) {
                return Err(ManifestError::DuplicateExecutableId(exe.id.to_string()));
            }
            if !path_stays_inside_prefix(&exe.path) {
                return Err(ManifestError::PathEscapesPrefix {
                    id: exe.id.to_string(),
                    path: exe.path.clone(),
                });
            }
        }

        if !self.executables.is_empty() {
            match self.executables.iter().filter(|e| e.is_primary).count() {
                0 => return Err(ManifestError::NoPrimaryExecutable),
                1 => {}
                _ => return Err(ManifestError::MultiplePrimaryExecutables),
            }
        }

        if !self.install.system_path.starts_with('/') {
            return Err(ManifestError::RelativeSystemPath(
                self.install.system_path.clone(),
            ));
        }

        if let WineConfig::Bundled { path } = &self.wine {
            if path.starts_with('/') {
                return Err(ManifestError::AbsoluteBundledPath(path.clone()));
            }
        }

        Ok(())
    }

    /// The resolved read-only installation path for this package.
    pub fn system_path(&self) -> String {
        self.install
            .system_path
            .replace("{name}", self.app.name.as_str())
    }

    /// The per-user data path template; still contains environment variables
    /// resolved by the launcher at first run.
    pub fn user_data_path(&self) -> String {
        self.install
            .user_data_path
            .replace("{name}", self.app.name.as_str())
    }

    pub fn primary_executable(&self) -> Option<&Executable> {
        self.executables.iter().find(|e| e.is_primary)
    }
}

/// Reject absolute paths, parent-directory escapes, and anything that does
/// not land under `drive_c/`.
fn path_stays_inside_prefix(path: &str) -> bool {
    let p = Path::new(path);
    if p.is_absolute() {
        return false;
    }
    let mut depth: i32 = 0;
    for comp in p.components() {
        match comp {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    path.starts_with("drive_c/")
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_version() -> String {
    "1.0.0".to_owned()
}

fn default_description() -> String {
    "A Windows application packaged for Linux".to_owned()
}

fn default_license() -> String {
    "Proprietary".to_owned()
}

fn default_system_path() -> String {
    "/opt/{name}".to_owned()
}

fn default_user_data_path() -> String {
    "${XDG_DATA_HOME}/{name}".to_owned()
}

fn default_arch() -> String {
    "win64".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_categories() -> Vec<String> {
    vec!["Application".to_owned()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> Manifest {
        Manifest {
            schema_version: SCHEMA_VERSION,
            app: AppMetadata {
                name: PackageName::new("myapp"),
                display_name: "My App".to_owned(),
                version: "2.1.0".to_owned(),
                description: "A test application".to_owned(),
                maintainer: Some("Jane Doe <jane@example.com>".to_owned()),
                homepage: None,
                license: "Proprietary".to_owned(),
            },
            wine: WineConfig::System {
                min_version: Some("9.0".to_owned()),
            },
            prefix: PrefixInfo {
                original_user: "jane".to_owned(),
                arch: "win64".to_owned(),
                wine_version: Some("9.0".to_owned()),
                has_dxvk: false,
                has_vkd3d: false,
                template_digest: None,
            },
            executables: vec![Executable {
                id: ExeId::new("main"),
                name: "My App".to_owned(),
                path: "drive_c/Program Files/MyApp/app.exe".to_owned(),
                args: String::new(),
                working_dir: None,
                icon: None,
                is_primary: true,
                description: None,
                desktop_entry: true,
                categories: vec!["Game".to_owned()],
            }],
            install: InstallConfig::default(),
            excluded_patterns: Vec::new(),
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        manifest.save(dir.path()).unwrap();
        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn load_accepts_file_or_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        let file = manifest.save(dir.path()).unwrap();
        assert_eq!(Manifest::load(&file).unwrap(), Manifest::load(dir.path()).unwrap());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut value = serde_json::to_value(sample_manifest()).unwrap();
        value["future_field"] = serde_json::json!({"nested": true});
        let parsed: Manifest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, sample_manifest());
    }

    #[test]
    fn rejects_unknown_wine_mode() {
        let mut value = serde_json::to_value(sample_manifest()).unwrap();
        value["wine"] = serde_json::json!({"mode": "flatpak"});
        assert!(serde_json::from_value::<Manifest>(value).is_err());
    }

    #[test]
    fn rejects_future_schema_version() {
        let mut manifest = sample_manifest();
        manifest.schema_version = 99;
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rejects_duplicate_executable_ids() {
        let mut manifest = sample_manifest();
        let mut dup = manifest.executables[0].clone();
        dup.is_primary = false;
        manifest.executables.push(dup);
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::DuplicateExecutableId(_))
        ));
    }

    #[test]
    fn rejects_path_escaping_prefix() {
        let mut manifest = sample_manifest();
        manifest.executables[0].path = "drive_c/../../etc/passwd".to_owned();
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::PathEscapesPrefix { .. })
        ));

        manifest.executables[0].path = "/etc/passwd".to_owned();
        assert!(manifest.validate().is_err());

        manifest.executables[0].path = "windows/system32/cmd.exe".to_owned();
        assert!(manifest.validate().is_err(), "must be under drive_c/");
    }

    #[test]
    fn requires_exactly_one_primary() {
        let mut manifest = sample_manifest();
        manifest.executables[0].is_primary = false;
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::NoPrimaryExecutable)
        ));

        let mut manifest = sample_manifest();
        let mut second = manifest.executables[0].clone();
        second.id = ExeId::new("settings");
        manifest.executables.push(second);
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::MultiplePrimaryExecutables)
        ));
    }

    #[test]
    fn empty_executables_needs_no_primary() {
        let mut manifest = sample_manifest();
        manifest.executables.clear();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn rejects_bad_versions() {
        for bad in ["", "1.0 beta", "v1;rm"] {
            let mut manifest = sample_manifest();
            manifest.app.version = bad.to_owned();
            assert!(manifest.validate().is_err(), "version {bad:?} must be rejected");
        }
    }

    #[test]
    fn rejects_bad_app_names() {
        for bad in ["", "My App", "-leading", "UPPER"] {
            let mut manifest = sample_manifest();
            manifest.app.name = PackageName::new(bad);
            assert!(manifest.validate().is_err(), "name {bad:?} must be rejected");
        }
    }

    #[test]
    fn system_path_substitutes_name() {
        let manifest = sample_manifest();
        assert_eq!(manifest.system_path(), "/opt/myapp");
        assert_eq!(manifest.user_data_path(), "${XDG_DATA_HOME}/myapp");
    }

    #[test]
    fn bundled_mode_requires_relative_path() {
        let mut manifest = sample_manifest();
        manifest.wine = WineConfig::Bundled {
            path: "/usr/lib/wine".to_owned(),
        };
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::AbsoluteBundledPath(_))
        ));

        manifest.wine = WineConfig::Bundled {
            path: "wine/wine-9.0".to_owned(),
        };
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn primary_executable_lookup() {
        let manifest = sample_manifest();
        assert_eq!(manifest.primary_executable().unwrap().id, ExeId::new("main"));
    }

    #[test]
    fn missing_optional_fields_are_defaulted() {
        let json = r#"{
            "app": { "name": "tinyapp", "display_name": "Tiny" },
            "wine": { "mode": "system" },
            "prefix": { "original_user": "bob" }
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.schema_version, SCHEMA_VERSION);
        assert_eq!(manifest.app.version, "1.0.0");
        assert_eq!(manifest.install.system_path, "/opt/{name}");
        assert!(!manifest.install.use_overlay);
        assert_eq!(manifest.prefix.arch, "win64");
    }
}
