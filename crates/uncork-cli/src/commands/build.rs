use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use std::path::Path;
use std::str::FromStr;
use uncork_build::{build, BuildError, PackageFormat};
use uncork_runtime::prereq::{check_build_prereqs, format_missing};
use uncork_spec::{IntermediateLayout, Manifest};

pub fn run(
    intermediate: &Path,
    output: &Path,
    formats: &[String],
    json: bool,
) -> Result<u8, String> {
    if formats.is_empty() {
        return Err(
            "validation error: at least one format required, use --format deb|pacman|rpm|dir"
                .to_owned(),
        );
    }

    let mut parsed = Vec::with_capacity(formats.len());
    for format in formats {
        parsed.push(
            PackageFormat::from_str(format).map_err(|e| format!("validation error: {e}"))?,
        );
    }

    for format in &parsed {
        let missing = check_build_prereqs(&format.to_string());
        if !missing.is_empty() {
            return Err(format!("tool error: {}", format_missing(&missing)));
        }
    }

    let manifest =
        Manifest::load(intermediate).map_err(|e| format!("manifest error: {e}"))?;
    let layout = IntermediateLayout::new(intermediate);

    if !json {
        println!(
            "building {} v{}",
            manifest.app.display_name, manifest.app.version
        );
        println!();
    }

    let mut artifacts = Vec::with_capacity(parsed.len());
    for format in parsed {
        let pb = if json {
            None
        } else {
            Some(spinner(&format!("building {format} package...")))
        };
        match build(format, &manifest, &layout, output) {
            Ok(path) => {
                if let Some(ref pb) = pb {
                    spin_ok(pb, &format!("{format}: {}", path.display()));
                }
                artifacts.push((format.to_string(), path));
            }
            Err(e) => {
                if let Some(ref pb) = pb {
                    spin_fail(pb, &format!("{format} build failed"));
                }
                return Err(build_error_message(&e));
            }
        }
    }

    if json {
        let payload = serde_json::json!({
            "app_name": manifest.app.name,
            "artifacts": artifacts
                .iter()
                .map(|(format, path)| serde_json::json!({"format": format, "path": path}))
                .collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!();
        println!("build complete");
    }
    Ok(EXIT_SUCCESS)
}

fn build_error_message(e: &BuildError) -> String {
    match e {
        BuildError::ToolMissing { .. } | BuildError::ToolFailed { .. } => {
            format!("tool error: {e}")
        }
        BuildError::Manifest(_) | BuildError::MissingInput(_) | BuildError::UnknownFormat(_) => {
            format!("validation error: {e}")
        }
        BuildError::Io(_) => e.to_string(),
    }
}
