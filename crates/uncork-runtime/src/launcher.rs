//! Launcher and hook script generation.
//!
//! Every built package embeds the same runtime logic as executable shell
//! artifacts: one entry-point script per manifest executable (first-run
//! initialization, overlay lifecycle, token resolution, Wine invocation),
//! a pre-removal hook that force-unmounts from mount-table ground truth,
//! and desktop integration files. Generation is pure string assembly so the
//! exact artifacts are testable without a filesystem.

use std::fmt::Write as _;
use std::path::Path;
use uncork_spec::{Executable, Manifest, WineConfig};

/// One generated artifact, relative to the staging root conventions used by
/// the builders: `bin/<exe-id>` scripts land in the package install dir,
/// `share/...` paths under `/usr/share`.
#[derive(Debug, Clone)]
pub struct LauncherFile {
    pub rel_path: String,
    pub content: String,
    pub executable: bool,
}

fn shell_quote(s: &str) -> String {
    // Single-quoting in POSIX shell: replace ' with '\'' then wrap in '
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Command name an executable is exposed under in `/usr/bin`.
///
/// The primary executable owns the bare application name; secondary entry
/// points get `<app>-<exe-id>`.
pub fn command_name(manifest: &Manifest, exe: &Executable) -> String {
    if exe.is_primary {
        manifest.app.name.to_string()
    } else {
        format!("{}-{}", manifest.app.name, exe.id)
    }
}

/// Generate every launcher artifact for a manifest.
pub fn generate_all(manifest: &Manifest) -> Vec<LauncherFile> {
    let mut files = Vec::new();

    for exe in &manifest.executables {
        files.push(LauncherFile {
            rel_path: format!("bin/{}", exe.id),
            content: generate_entry_script(manifest, exe),
            executable: true,
        });

        if exe.desktop_entry {
            let command = command_name(manifest, exe);
            files.push(LauncherFile {
                rel_path: format!("share/applications/{command}.desktop"),
                content: generate_desktop_entry(manifest, exe, &command),
                executable: false,
            });
        }
    }

    files
}

/// The entry-point script for one executable.
#[allow(clippy::too_many_lines)]
pub fn generate_entry_script(manifest: &Manifest, exe: &Executable) -> String {
    let system_path = manifest.system_path();
    let use_overlay = u8::from(manifest.install.use_overlay);
    let wine_bin = match &manifest.wine {
        WineConfig::System { .. } => "wine".to_owned(),
        WineConfig::Bundled { path } => format!("{system_path}/{path}/bin/wine"),
    };

    let mut s = String::new();
    let _ = writeln!(s, "#!/bin/sh");
    let _ = writeln!(
        s,
        "# Entry point for {} ({}), generated by uncork.",
        exe.name, manifest.app.name
    );
    let _ = writeln!(s, "set -u");
    let _ = writeln!(s);
    let _ = writeln!(s, "APP_ROOT={}", shell_quote(&system_path));
    let _ = writeln!(s, "APP_NAME={}", shell_quote(manifest.app.name.as_str()));
    let _ = writeln!(s, "EXE_PATH={}", shell_quote(&exe.path));
    let _ = writeln!(s, "EXE_ARGS={}", shell_quote(&exe.args));
    let _ = writeln!(s, "EXE_WORKDIR={}", shell_quote(&exe.effective_working_dir()));
    let _ = writeln!(s, "USE_OVERLAY={use_overlay}");
    let _ = writeln!(s, "WINE_BIN={}", shell_quote(&wine_bin));
    let _ = writeln!(s, "TEMPLATE=\"$APP_ROOT/prefix-template\"");
    let _ = writeln!(
        s,
        "DATA_ROOT=\"${{XDG_DATA_HOME:-$HOME/.local/share}}/$APP_NAME\""
    );
    let _ = writeln!(s, "PREFIX=\"$DATA_ROOT/prefix\"");
    let _ = writeln!(s, "UPPER=\"$DATA_ROOT/upper\"");
    let _ = writeln!(s, "WORK=\"$DATA_ROOT/work\"");
    let _ = writeln!(s, "LOCK=\"$DATA_ROOT/.mount.lock\"");
    let _ = writeln!(s, "COUNT=\"$DATA_ROOT/.mount.count\"");
    let _ = writeln!(s);

    if let WineConfig::System { min_version } = &manifest.wine {
        let requirement = min_version
            .as_deref()
            .map_or_else(String::new, |v| format!(" (requires Wine >= {v})"));
        let _ = writeln!(s, "if ! command -v \"$WINE_BIN\" >/dev/null 2>&1; then");
        let _ = writeln!(
            s,
            "    echo \"error: wine not found in PATH{requirement}\" >&2"
        );
        let _ = writeln!(s, "    exit 1");
        let _ = writeln!(s, "fi");
        let _ = writeln!(s);
    }

    let _ = writeln!(s, "mkdir -p \"$DATA_ROOT\"");
    let _ = writeln!(s);
    let _ = writeln!(s, "is_mounted() {{");
    let _ = writeln!(
        s,
        "    mountpoint -q \"$PREFIX\" 2>/dev/null || grep -qs \" $PREFIX \" /proc/mounts"
    );
    let _ = writeln!(s, "}}");
    let _ = writeln!(s);
    let _ = writeln!(s, "resolve_tokens() {{");
    let _ = writeln!(
        s,
        "    # Safe to repeat: resolved files contain no tokens."
    );
    let _ = writeln!(s, "    for reg in system.reg user.reg userdef.reg; do");
    let _ = writeln!(s, "        [ -f \"$PREFIX/$reg\" ] || continue");
    let _ = writeln!(
        s,
        "        sed -i \"s|__USER_HOME__|$HOME|g; s|__WINE_USER__|$USER|g\" \"$PREFIX/$reg\""
    );
    let _ = writeln!(s, "    done");
    let _ = writeln!(
        s,
        "    if [ -d \"$PREFIX/drive_c/users/__WINE_USER__\" ] && [ ! -e \"$PREFIX/drive_c/users/$USER\" ]; then"
    );
    let _ = writeln!(
        s,
        "        mv \"$PREFIX/drive_c/users/__WINE_USER__\" \"$PREFIX/drive_c/users/$USER\""
    );
    let _ = writeln!(s, "    fi");
    let _ = writeln!(s, "    mkdir -p \"$PREFIX/dosdevices\"");
    let _ = writeln!(
        s,
        "    [ -e \"$PREFIX/dosdevices/c:\" ] || ln -s ../drive_c \"$PREFIX/dosdevices/c:\""
    );
    let _ = writeln!(
        s,
        "    [ -e \"$PREFIX/dosdevices/z:\" ] || ln -s / \"$PREFIX/dosdevices/z:\""
    );
    let _ = writeln!(s, "}}");
    let _ = writeln!(s);
    let _ = writeln!(s, "materialize_copy() {{");
    let _ = writeln!(s, "    if [ ! -f \"$PREFIX/system.reg\" ]; then");
    let _ = writeln!(s, "        mkdir -p \"$PREFIX\"");
    let _ = writeln!(s, "        cp -a \"$TEMPLATE/.\" \"$PREFIX/\"");
    let _ = writeln!(s, "    fi");
    let _ = writeln!(s, "}}");
    let _ = writeln!(s);
    let _ = writeln!(s, "mount_overlay() {{");
    let _ = writeln!(s, "    mkdir -p \"$UPPER\" \"$PREFIX\"");
    let _ = writeln!(s, "    rm -rf \"$WORK\"");
    let _ = writeln!(s, "    mkdir -p \"$WORK\"");
    let _ = writeln!(s, "    command -v fuse-overlayfs >/dev/null 2>&1 || return 1");
    let _ = writeln!(
        s,
        "    fuse-overlayfs -o \"lowerdir=$TEMPLATE,upperdir=$UPPER,workdir=$WORK\" \"$PREFIX\""
    );
    let _ = writeln!(s, "}}");
    let _ = writeln!(s);
    let _ = writeln!(s, "acquire_instance() {{");
    let _ = writeln!(s, "    exec 9>\"$LOCK\"");
    let _ = writeln!(s, "    flock 9");
    let _ = writeln!(s, "    count=$(cat \"$COUNT\" 2>/dev/null || echo 0)");
    let _ = writeln!(s, "    if [ \"$USE_OVERLAY\" = 1 ]; then");
    let _ = writeln!(s, "        if [ \"$count\" -eq 0 ] && ! is_mounted; then");
    let _ = writeln!(s, "            if ! mount_overlay; then");
    let _ = writeln!(
        s,
        "                echo 'warning: overlay unavailable, using a full copy instead' >&2"
    );
    let _ = writeln!(s, "                USE_OVERLAY=0");
    let _ = writeln!(s, "                materialize_copy");
    let _ = writeln!(s, "            fi");
    let _ = writeln!(s, "        fi");
    let _ = writeln!(s, "    else");
    let _ = writeln!(s, "        materialize_copy");
    let _ = writeln!(s, "    fi");
    let _ = writeln!(s, "    echo $((count + 1)) >\"$COUNT\"");
    let _ = writeln!(s, "    resolve_tokens");
    let _ = writeln!(s, "    flock -u 9");
    let _ = writeln!(s, "}}");
    let _ = writeln!(s);
    let _ = writeln!(s, "release_instance() {{");
    let _ = writeln!(s, "    exec 9>\"$LOCK\"");
    let _ = writeln!(s, "    flock 9");
    let _ = writeln!(s, "    count=$(cat \"$COUNT\" 2>/dev/null || echo 1)");
    let _ = writeln!(s, "    count=$((count - 1))");
    let _ = writeln!(s, "    if [ \"$count\" -lt 0 ]; then count=0; fi");
    let _ = writeln!(s, "    echo \"$count\" >\"$COUNT\"");
    let _ = writeln!(
        s,
        "    if [ \"$count\" -eq 0 ] && [ \"$USE_OVERLAY\" = 1 ] && is_mounted; then"
    );
    let _ = writeln!(s, "        fusermount3 -u \"$PREFIX\" 2>/dev/null \\");
    let _ = writeln!(s, "            || fusermount -u \"$PREFIX\" 2>/dev/null \\");
    let _ = writeln!(s, "            || umount -l \"$PREFIX\" 2>/dev/null \\");
    let _ = writeln!(
        s,
        "            || echo \"warning: could not unmount $PREFIX\" >&2"
    );
    let _ = writeln!(s, "    fi");
    let _ = writeln!(s, "    flock -u 9");
    let _ = writeln!(s, "}}");
    let _ = writeln!(s);
    let _ = writeln!(s, "acquire_instance");
    let _ = writeln!(s, "trap release_instance EXIT");
    let _ = writeln!(s);
    let _ = writeln!(s, "export WINEPREFIX=\"$PREFIX\"");
    let _ = writeln!(
        s,
        "cd \"$PREFIX/$EXE_WORKDIR\" 2>/dev/null || cd \"$PREFIX\""
    );
    let _ = writeln!(s, "status=0");
    let _ = writeln!(
        s,
        "\"$WINE_BIN\" \"$PREFIX/$EXE_PATH\" $EXE_ARGS \"$@\" || status=$?"
    );
    let _ = writeln!(s, "exit \"$status\"");

    s
}

/// Pre-removal hook body, without a shebang; each builder wraps it in its
/// scriptlet convention).
///
/// Runs as root in the package manager's process, a different lifetime from
/// any launcher: reference counts are unobservable, so the mount table is
/// queried directly and unmount is attempted unconditionally. Per-user data
/// itself is left in place: packages are removable, user data is not ours
/// to delete.
pub fn generate_preremove_hook(manifest: &Manifest) -> String {
    let app = &manifest.app.name;

    let mut s = String::new();
    let _ = writeln!(
        s,
        "# Force-unmount overlay prefixes before package files are removed."
    );
    let _ = writeln!(
        s,
        "# Must never fail: a stale mount is preferable to an unremovable package."
    );
    let _ = writeln!(s, "for user_home in /home/*; do");
    let _ = writeln!(s, "    [ -d \"$user_home\" ] || continue");
    let _ = writeln!(s, "    username=${{user_home##*/}}");
    let _ = writeln!(s, "    merged=\"$user_home/.local/share/{app}/prefix\"");
    let _ = writeln!(s, "    grep -qs \"$merged\" /proc/mounts || continue");
    let _ = writeln!(s, "    for attempt in 1 2 3 4 5; do");
    let _ = writeln!(s, "        fuser -km \"$merged\" 2>/dev/null || true");
    let _ = writeln!(s, "        sleep 0.2");
    let _ = writeln!(
        s,
        "        su \"$username\" -c \"fusermount3 -u '$merged'\" 2>/dev/null && break"
    );
    let _ = writeln!(s, "        fusermount3 -u \"$merged\" 2>/dev/null && break");
    let _ = writeln!(s, "        umount -l \"$merged\" 2>/dev/null && break");
    let _ = writeln!(s, "        sleep 0.5");
    let _ = writeln!(s, "    done");
    let _ = writeln!(s, "    if grep -qs \"$merged\" /proc/mounts; then");
    let _ = writeln!(
        s,
        "        echo \"warning: could not unmount $merged; continuing removal\" >&2"
    );
    let _ = writeln!(s, "    fi");
    let _ = writeln!(s, "done");

    s
}

/// Post-install hook body: desktop database and icon cache refresh only.
/// User data is never created here; first run owns that.
pub fn generate_postinstall_hook() -> String {
    let mut s = String::new();
    let _ = writeln!(
        s,
        "if command -v update-desktop-database >/dev/null 2>&1; then"
    );
    let _ = writeln!(
        s,
        "    update-desktop-database -q /usr/share/applications || true"
    );
    let _ = writeln!(s, "fi");
    let _ = writeln!(
        s,
        "if command -v gtk-update-icon-cache >/dev/null 2>&1; then"
    );
    let _ = writeln!(
        s,
        "    gtk-update-icon-cache -q -t -f /usr/share/icons/hicolor || true"
    );
    let _ = writeln!(s, "fi");
    s
}

/// XDG desktop entry for one executable.
pub fn generate_desktop_entry(manifest: &Manifest, exe: &Executable, command: &str) -> String {
    let comment = exe
        .description
        .as_deref()
        .unwrap_or(&manifest.app.description);
    let wm_class = Path::new(&exe.path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut categories = exe.categories.join(";");
    if !categories.is_empty() {
        categories.push(';');
    }

    let mut s = String::new();
    let _ = writeln!(s, "[Desktop Entry]");
    let _ = writeln!(s, "Type=Application");
    let _ = writeln!(s, "Name={}", exe.name);
    let _ = writeln!(s, "Comment={comment}");
    let _ = writeln!(s, "Exec={command}");
    let _ = writeln!(s, "Icon={command}");
    let _ = writeln!(s, "Terminal=false");
    let _ = writeln!(s, "Categories={categories}");
    let _ = writeln!(s, "StartupWMClass={wm_class}");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use uncork_spec::{
        AppMetadata, ExeId, InstallConfig, PackageName, PrefixInfo, SCHEMA_VERSION,
    };

    fn manifest(use_overlay: bool, wine: WineConfig) -> Manifest {
        Manifest {
            schema_version: SCHEMA_VERSION,
            app: AppMetadata {
                name: PackageName::new("pso"),
                display_name: "Phantasy Star Online".to_owned(),
                version: "1.0.0".to_owned(),
                description: "A space RPG".to_owned(),
                maintainer: None,
                homepage: None,
                license: "Proprietary".to_owned(),
            },
            wine,
            prefix: PrefixInfo {
                original_user: "alice".to_owned(),
                arch: "win64".to_owned(),
                wine_version: None,
                has_dxvk: false,
                has_vkd3d: false,
                template_digest: None,
            },
            executables: vec![
                Executable {
                    id: ExeId::new("main"),
                    name: "Phantasy Star Online".to_owned(),
                    path: "drive_c/Games/PSO/pso.exe".to_owned(),
                    args: String::new(),
                    working_dir: None,
                    icon: None,
                    is_primary: true,
                    description: None,
                    desktop_entry: true,
                    categories: vec!["Game".to_owned()],
                },
                Executable {
                    id: ExeId::new("config"),
                    name: "PSO Settings".to_owned(),
                    path: "drive_c/Games/PSO/config.exe".to_owned(),
                    args: "--settings".to_owned(),
                    working_dir: None,
                    icon: None,
                    is_primary: false,
                    description: Some("Configure graphics and input".to_owned()),
                    desktop_entry: true,
                    categories: vec!["Game".to_owned(), "Settings".to_owned()],
                },
            ],
            install: InstallConfig {
                use_overlay,
                ..InstallConfig::default()
            },
            excluded_patterns: Vec::new(),
        }
    }

    fn system_wine() -> WineConfig {
        WineConfig::System {
            min_version: Some("9.0".to_owned()),
        }
    }

    #[test]
    fn command_names_follow_primary_rule() {
        let m = manifest(false, system_wine());
        assert_eq!(command_name(&m, &m.executables[0]), "pso");
        assert_eq!(command_name(&m, &m.executables[1]), "pso-config");
    }

    #[test]
    fn entry_script_overlay_mode_mounts_and_releases() {
        let m = manifest(true, system_wine());
        let script = generate_entry_script(&m, &m.executables[0]);
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("USE_OVERLAY=1"));
        assert!(script.contains("fuse-overlayfs -o"));
        assert!(script.contains("trap release_instance EXIT"));
        assert!(script.contains("fusermount3 -u"));
        assert!(script.contains("flock 9"));
    }

    #[test]
    fn entry_script_copy_mode_disables_overlay() {
        let m = manifest(false, system_wine());
        let script = generate_entry_script(&m, &m.executables[0]);
        assert!(script.contains("USE_OVERLAY=0"));
        assert!(script.contains("materialize_copy"));
    }

    #[test]
    fn entry_script_resolves_tokens_idempotently() {
        let m = manifest(true, system_wine());
        let script = generate_entry_script(&m, &m.executables[0]);
        assert!(script.contains("__USER_HOME__"));
        assert!(script.contains("__WINE_USER__"));
        assert!(script.contains("resolve_tokens"));
    }

    #[test]
    fn system_mode_checks_for_wine_on_path() {
        let m = manifest(false, system_wine());
        let script = generate_entry_script(&m, &m.executables[0]);
        assert!(script.contains("WINE_BIN='wine'"));
        assert!(script.contains("requires Wine >= 9.0"));
    }

    #[test]
    fn bundled_mode_uses_packaged_wine_without_check() {
        let m = manifest(
            false,
            WineConfig::Bundled {
                path: "wine/wine-9.0".to_owned(),
            },
        );
        let script = generate_entry_script(&m, &m.executables[0]);
        assert!(script.contains("WINE_BIN='/opt/pso/wine/wine-9.0/bin/wine'"));
        assert!(!script.contains("wine not found in PATH"));
    }

    #[test]
    fn secondary_executable_passes_fixed_args() {
        let m = manifest(false, system_wine());
        let script = generate_entry_script(&m, &m.executables[1]);
        assert!(script.contains("EXE_ARGS='--settings'"));
        assert!(script.contains("EXE_PATH='drive_c/Games/PSO/config.exe'"));
    }

    #[test]
    fn preremove_hook_unmounts_from_mount_table() {
        let m = manifest(true, system_wine());
        let hook = generate_preremove_hook(&m);
        assert!(hook.contains("/proc/mounts"));
        assert!(hook.contains(".local/share/pso/prefix"));
        assert!(hook.contains("fusermount3 -u"));
        assert!(hook.contains("umount -l"));
        assert!(hook.contains("continuing removal"));
        // Removal must not delete per-user data.
        assert!(!hook.contains("rm -rf"));
    }

    #[test]
    fn postinstall_hook_never_creates_user_data() {
        let hook = generate_postinstall_hook();
        assert!(hook.contains("update-desktop-database"));
        assert!(!hook.contains("mkdir"));
        assert!(!hook.contains(".local/share"));
    }

    #[test]
    fn desktop_entry_fields() {
        let m = manifest(false, system_wine());
        let entry = generate_desktop_entry(&m, &m.executables[1], "pso-config");
        assert!(entry.contains("Name=PSO Settings"));
        assert!(entry.contains("Comment=Configure graphics and input"));
        assert!(entry.contains("Exec=pso-config"));
        assert!(entry.contains("Icon=pso-config"));
        assert!(entry.contains("Categories=Game;Settings;"));
        assert!(entry.contains("StartupWMClass=config.exe"));
    }

    #[test]
    fn generate_all_produces_scripts_and_desktop_files() {
        let m = manifest(true, system_wine());
        let files = generate_all(&m);
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert!(paths.contains(&"bin/main"));
        assert!(paths.contains(&"bin/config"));
        assert!(paths.contains(&"share/applications/pso.desktop"));
        assert!(paths.contains(&"share/applications/pso-config.desktop"));

        for f in &files {
            if f.rel_path.starts_with("bin/") {
                assert!(f.executable);
            } else {
                assert!(!f.executable);
            }
        }
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("hello"), "'hello'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn shell_quote_prevents_injection_through_paths() {
        let m = {
            let mut m = manifest(false, system_wine());
            m.executables[0].path = "drive_c/Games/$(rm -rf ~)/pso.exe".to_owned();
            m
        };
        let script = generate_entry_script(&m, &m.executables[0]);
        assert!(script.contains("EXE_PATH='drive_c/Games/$(rm -rf ~)/pso.exe'"));
    }
}
