//! Prefix analysis: scan a Wine prefix and report its structure, runtime
//! stack, and candidate executables before capture.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// An executable found in the prefix.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedExecutable {
    /// Path relative to the prefix root.
    pub path: String,
    /// File name without extension.
    pub name: String,
    pub size: u64,
    /// Likely a main application rather than an installer or helper.
    pub probable_app: bool,
}

/// Results of analyzing a Wine prefix.
#[derive(Debug, Clone, Serialize)]
pub struct PrefixAnalysis {
    pub prefix_path: PathBuf,
    pub exists: bool,
    pub is_valid_prefix: bool,

    /// `win32` or `win64`.
    pub arch: String,
    pub has_system_reg: bool,
    pub has_user_reg: bool,

    pub total_size: u64,
    pub drive_c_size: u64,

    pub wine_version: Option<String>,
    pub has_dxvk: bool,
    pub has_vkd3d: bool,

    pub detected_user: Option<String>,
    pub executables: Vec<DetectedExecutable>,
    pub warnings: Vec<String>,
}

impl PrefixAnalysis {
    fn empty(prefix_path: PathBuf) -> Self {
        Self {
            prefix_path,
            exists: false,
            is_valid_prefix: false,
            arch: "win64".to_owned(),
            has_system_reg: false,
            has_user_reg: false,
            total_size: 0,
            drive_c_size: 0,
            wine_version: None,
            has_dxvk: false,
            has_vkd3d: false,
            detected_user: None,
            executables: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Analyzes Wine prefix contents.
pub struct PrefixAnalyzer {
    prefix_path: PathBuf,
}

/// Executables matching these patterns are installers, uninstallers, or
/// helpers, not entry-point candidates.
const SKIP_EXE_PATTERNS: &[&str] = &[
    r"(?i)unins\d*\.exe$",
    r"(?i)uninst.*\.exe$",
    r"(?i)setup\.exe$",
    r"(?i)install.*\.exe$",
    r"(?i)update.*\.exe$",
    r"(?i)crash.*\.exe$",
    r"(?i)report.*\.exe$",
    r"(?i)helper.*\.exe$",
];

/// System directories that never hold the main application.
const SKIP_DIRS: &[&str] = &[
    "windows",
    "Program Files/Common Files",
    "Program Files (x86)/Common Files",
    "ProgramData",
];

/// A DLL smaller than this is a Wine stub, not a real DXVK/VKD3D build.
const REAL_DLL_MIN_SIZE: u64 = 100_000;

impl PrefixAnalyzer {
    pub fn new(prefix_path: impl Into<PathBuf>) -> Self {
        Self {
            prefix_path: prefix_path.into(),
        }
    }

    pub fn analyze(&self) -> PrefixAnalysis {
        let mut result = PrefixAnalysis::empty(self.prefix_path.clone());

        if !self.prefix_path.exists() {
            result
                .warnings
                .push(format!("prefix path does not exist: {}", self.prefix_path.display()));
            return result;
        }
        result.exists = true;

        let drive_c = self.prefix_path.join("drive_c");
        result.has_system_reg = self.prefix_path.join("system.reg").exists();
        result.has_user_reg = self.prefix_path.join("user.reg").exists();
        result.is_valid_prefix = drive_c.exists() && result.has_system_reg;

        if !result.is_valid_prefix {
            result
                .warnings
                .push("missing drive_c or system.reg - may not be a valid Wine prefix".to_owned());
            return result;
        }

        result.arch = self.detect_arch();
        result.detected_user = self.detect_user();
        result.total_size = dir_size(&self.prefix_path);
        result.drive_c_size = dir_size(&drive_c);
        result.wine_version = self.detect_wine_version();
        result.has_dxvk = self.detect_dxvk();
        result.has_vkd3d = self.detect_vkd3d();
        result.executables = self.find_executables();

        self.check_issues(&mut result);

        result
    }

    /// win64 prefixes carry a 32-bit syswow64 next to the 64-bit system32.
    fn detect_arch(&self) -> String {
        let syswow64 = self.prefix_path.join("drive_c/windows/syswow64");
        if syswow64.exists() {
            "win64".to_owned()
        } else {
            "win32".to_owned()
        }
    }

    fn detect_user(&self) -> Option<String> {
        let users_dir = self.prefix_path.join("drive_c/users");
        let entries = std::fs::read_dir(users_dir).ok()?;
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let lower = name.to_lowercase();
            if lower != "public" && lower != "default" {
                return Some(name);
            }
        }
        None
    }

    fn detect_wine_version(&self) -> Option<String> {
        let content = read_lossy(&self.prefix_path.join("system.reg"))?;
        let re = Regex::new(r#""ProductName"="Wine (\d+\.\d+[^"]*)""#).expect("static pattern");
        re.captures(&content).map(|c| c[1].to_owned())
    }

    fn detect_dxvk(&self) -> bool {
        let system32 = self.prefix_path.join("drive_c/windows/system32");
        ["d3d9.dll", "d3d10core.dll", "d3d11.dll", "dxgi.dll"]
            .iter()
            .any(|dll| {
                system32
                    .join(dll)
                    .metadata()
                    .map(|m| m.len() > REAL_DLL_MIN_SIZE)
                    .unwrap_or(false)
            })
    }

    fn detect_vkd3d(&self) -> bool {
        self.prefix_path
            .join("drive_c/windows/system32/d3d12.dll")
            .metadata()
            .map(|m| m.len() > REAL_DLL_MIN_SIZE)
            .unwrap_or(false)
    }

    fn find_executables(&self) -> Vec<DetectedExecutable> {
        let skip: Vec<Regex> = SKIP_EXE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("static pattern"))
            .collect();

        let mut executables = Vec::new();
        let drive_c = self.prefix_path.join("drive_c");
        let mut stack = vec![drive_c];

        while let Some(dir) = stack.pop() {
            let rel_dir = dir
                .strip_prefix(&self.prefix_path)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rel_lower = rel_dir.to_lowercase();
            if SKIP_DIRS
                .iter()
                .any(|s| rel_lower.contains(&format!("drive_c/{}", s.to_lowercase())))
            {
                continue;
            }

            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if !file_name.to_lowercase().ends_with(".exe") {
                    continue;
                }
                if skip.iter().any(|p| p.is_match(&file_name)) {
                    continue;
                }

                let size = path.metadata().map(|m| m.len()).unwrap_or(0);
                let rel = path
                    .strip_prefix(&self.prefix_path)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                executables.push(DetectedExecutable {
                    path: rel,
                    name: path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size,
                    // Larger executables are more likely the main app.
                    probable_app: size > 1_000_000,
                });
            }
        }

        executables.sort_by(|a, b| b.size.cmp(&a.size));
        executables
    }

    fn check_issues(&self, result: &mut PrefixAnalysis) {
        if let Some(user) = &result.detected_user {
            let user_dir = self.prefix_path.join("drive_c/users").join(user);
            for item in ["Desktop", "Documents", "Downloads", "Music", "Pictures", "Videos"] {
                let link = user_dir.join(item);
                if link.is_symlink() {
                    if let Ok(target) = std::fs::read_link(&link) {
                        if target.is_absolute() {
                            result.warnings.push(format!(
                                "shell folder '{item}' links to absolute path: {}",
                                target.display()
                            ));
                        }
                    }
                }
            }
        }

        let z_drive = self.prefix_path.join("dosdevices/z:");
        if z_drive.is_symlink() {
            if let Ok(target) = std::fs::read_link(&z_drive) {
                if target == Path::new("/") {
                    result
                        .warnings
                        .push("Z: drive exposes the full filesystem".to_owned());
                }
            }
        }
    }
}

/// Convenience function to analyze a prefix.
pub fn analyze_prefix(prefix_path: impl Into<PathBuf>) -> PrefixAnalysis {
    PrefixAnalyzer::new(prefix_path).analyze()
}

fn read_lossy(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
}

fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_prefix(dir: &Path, user: &str) -> PathBuf {
        let prefix = dir.join("prefix");
        fs::create_dir_all(prefix.join("drive_c/windows/syswow64")).unwrap();
        fs::create_dir_all(prefix.join("drive_c/windows/system32")).unwrap();
        fs::create_dir_all(prefix.join(format!("drive_c/users/{user}"))).unwrap();
        fs::create_dir_all(prefix.join("drive_c/users/Public")).unwrap();
        fs::write(
            prefix.join("system.reg"),
            "WINE REGISTRY Version 2\n\"ProductName\"=\"Wine 9.0.1\"\n",
        )
        .unwrap();
        fs::write(prefix.join("user.reg"), "WINE REGISTRY Version 2\n").unwrap();
        prefix
    }

    #[test]
    fn analyzes_valid_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = make_prefix(dir.path(), "alice");
        let result = analyze_prefix(&prefix);
        assert!(result.is_valid_prefix);
        assert_eq!(result.arch, "win64");
        assert_eq!(result.detected_user.as_deref(), Some("alice"));
        assert_eq!(result.wine_version.as_deref(), Some("9.0.1"));
    }

    #[test]
    fn missing_prefix_is_invalid_with_warning() {
        let result = analyze_prefix("/nonexistent/uncork-prefix");
        assert!(!result.exists);
        assert!(!result.is_valid_prefix);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn directory_without_registry_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("drive_c")).unwrap();
        let result = analyze_prefix(dir.path());
        assert!(result.exists);
        assert!(!result.is_valid_prefix);
    }

    #[test]
    fn detects_win32_without_syswow64() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("prefix");
        fs::create_dir_all(prefix.join("drive_c/windows/system32")).unwrap();
        fs::write(prefix.join("system.reg"), "WINE REGISTRY Version 2\n").unwrap();
        let result = analyze_prefix(&prefix);
        assert_eq!(result.arch, "win32");
    }

    #[test]
    fn finds_executables_and_skips_installers() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = make_prefix(dir.path(), "alice");
        let app_dir = prefix.join("drive_c/Games/PSO");
        fs::create_dir_all(&app_dir).unwrap();
        fs::write(app_dir.join("pso.exe"), vec![0u8; 2_000_000]).unwrap();
        fs::write(app_dir.join("unins000.exe"), vec![0u8; 500_000]).unwrap();
        fs::write(app_dir.join("setup.exe"), vec![0u8; 500_000]).unwrap();

        let result = analyze_prefix(&prefix);
        let names: Vec<&str> = result.executables.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["pso"]);
        assert!(result.executables[0].probable_app);
        assert_eq!(result.executables[0].path, "drive_c/Games/PSO/pso.exe");
    }

    #[test]
    fn ignores_executables_under_windows_dir() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = make_prefix(dir.path(), "alice");
        fs::write(
            prefix.join("drive_c/windows/system32/notepad.exe"),
            vec![0u8; 2_000_000],
        )
        .unwrap();
        let result = analyze_prefix(&prefix);
        assert!(result.executables.is_empty());
    }

    #[test]
    fn detects_dxvk_from_large_dlls() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = make_prefix(dir.path(), "alice");
        fs::write(
            prefix.join("drive_c/windows/system32/d3d11.dll"),
            vec![0u8; 200_000],
        )
        .unwrap();
        let result = analyze_prefix(&prefix);
        assert!(result.has_dxvk);
        assert!(!result.has_vkd3d);
    }

    #[test]
    fn stub_dlls_do_not_count_as_dxvk() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = make_prefix(dir.path(), "alice");
        fs::write(prefix.join("drive_c/windows/system32/d3d11.dll"), vec![0u8; 1_000]).unwrap();
        let result = analyze_prefix(&prefix);
        assert!(!result.has_dxvk);
    }

    #[test]
    fn warns_about_absolute_shell_folder_links() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = make_prefix(dir.path(), "alice");
        std::os::unix::fs::symlink("/home/alice/Desktop", prefix.join("drive_c/users/alice/Desktop"))
            .unwrap();
        let result = analyze_prefix(&prefix);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("Desktop") && w.contains("absolute")));
    }
}
