use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools needed for overlay-mode packages at runtime.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_overlay_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("fuse-overlayfs") {
        missing.push(MissingPrereq {
            name: "fuse-overlayfs",
            purpose: "overlay filesystem for the per-user writable prefix layer",
            install_hint: "apt install fuse-overlayfs | dnf install fuse-overlayfs | pacman -S fuse-overlayfs",
        });
    }

    if !command_exists("fusermount3") && !command_exists("fusermount") {
        missing.push(MissingPrereq {
            name: "fusermount3",
            purpose: "unmounting user-owned FUSE mounts",
            install_hint: "part of fuse3 (usually pre-installed)",
        });
    }

    missing
}

/// Check the external tools a given package format build may invoke.
///
/// Only hard requirements are reported: formats with a built-in manual
/// fallback (deb via `ar`, pacman via the zstd library) report nothing.
pub fn check_build_prereqs(format: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if format == "rpm" && !command_exists("fpm") && !command_exists("rpmbuild") {
        missing.push(MissingPrereq {
            name: "fpm or rpmbuild",
            purpose: "RPM package assembly",
            install_hint: "gem install fpm | dnf install rpm-build | apt install rpm",
        });
    }

    missing
}

/// Check the tools used for icon extraction during capture. All are
/// optional; a missing tool degrades capture to icon-less packages.
pub fn check_capture_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("wrestool") || !command_exists("icotool") {
        missing.push(MissingPrereq {
            name: "icoutils",
            purpose: "extracting icons from Windows executables",
            install_hint: "apt install icoutils | dnf install icoutils | pacman -S icoutils",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "fuse-overlayfs",
            purpose: "overlay mounts",
            install_hint: "apt install fuse-overlayfs",
        };
        let s = format!("{m}");
        assert!(s.contains("fuse-overlayfs"));
        assert!(s.contains("overlay mounts"));
        assert!(s.contains("apt install"));
    }

    #[test]
    fn format_missing_produces_readable_output() {
        let items = vec![
            MissingPrereq {
                name: "fuse-overlayfs",
                purpose: "overlay",
                install_hint: "apt install fuse-overlayfs",
            },
            MissingPrereq {
                name: "fpm",
                purpose: "rpm builds",
                install_hint: "gem install fpm",
            },
        ];
        let output = format_missing(&items);
        assert!(output.contains("missing prerequisites:"));
        assert!(output.contains("fuse-overlayfs"));
        assert!(output.contains("fpm"));
    }

    #[test]
    fn deb_and_pacman_have_no_hard_build_prereqs() {
        assert!(check_build_prereqs("deb").is_empty());
        assert!(check_build_prereqs("pacman").is_empty());
        assert!(check_build_prereqs("dir").is_empty());
    }

    #[test]
    fn command_exists_for_shell() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely-not-a-real-tool-xyz"));
    }
}
