use super::{json_pretty, EXIT_SUCCESS};
use serde::Serialize;
use uncork_runtime::prereq::{
    check_build_prereqs, check_capture_prereqs, check_overlay_prereqs, command_exists,
};

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    status: &'static str,
    detail: String,
}

impl Check {
    fn pass(name: &'static str, detail: &str) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.to_owned(),
        }
    }

    fn warn(name: &'static str, detail: &str) -> Self {
        Self {
            name,
            status: "warn",
            detail: detail.to_owned(),
        }
    }
}

pub fn run(json: bool) -> Result<u8, String> {
    let mut checks = Vec::new();

    let missing = check_overlay_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass(
            "overlay_runtime",
            "fuse-overlayfs and fusermount available",
        ));
    } else {
        checks.push(Check::warn(
            "overlay_runtime",
            &format!(
                "overlay-mode packages will fall back to full copies; missing: {}",
                missing
                    .iter()
                    .map(|m| m.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    }

    let missing = check_capture_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("icon_extraction", "icoutils available"));
    } else {
        checks.push(Check::warn(
            "icon_extraction",
            "icoutils missing; captures will produce icon-less packages",
        ));
    }

    for (name, tool) in [("deb_tooling", "dpkg-deb"), ("pacman_tooling", "bsdtar")] {
        if command_exists(tool) {
            checks.push(Check::pass(name, &format!("{tool} available")));
        } else {
            checks.push(Check::warn(
                name,
                &format!("{tool} missing; the built-in fallback packer will be used"),
            ));
        }
    }

    let missing = check_build_prereqs("rpm");
    if missing.is_empty() {
        checks.push(Check::pass("rpm_tooling", "fpm or rpmbuild available"));
    } else {
        checks.push(Check::warn(
            "rpm_tooling",
            "neither fpm nor rpmbuild found; rpm builds will fail",
        ));
    }

    if json {
        println!("{}", json_pretty(&checks)?);
    } else {
        for check in &checks {
            let symbol = match check.status {
                "pass" => "✓",
                _ => "⚠",
            };
            println!("{symbol} {:<16} {}", check.name, check.detail);
        }
    }
    Ok(EXIT_SUCCESS)
}
