use super::{json_pretty, parse_keyed, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uncork_capture::{sanitize_id, CaptureError, ExecutableSpec, PrefixCapture};
use uncork_spec::{AppMetadata, InstallConfig, PackageName};

pub struct Options {
    pub prefix: PathBuf,
    pub output: PathBuf,
    pub exes: Vec<String>,
    pub icons: Vec<String>,
    pub exe_descs: Vec<String>,
    pub exe_args: Vec<String>,
    pub app_name: Option<String>,
    pub app_version: String,
    pub bundled: bool,
    pub wine_path: Option<PathBuf>,
    pub min_wine_version: String,
    pub overlay: bool,
    pub excludes: Vec<String>,
    pub text_globs: Vec<String>,
    pub json: bool,
}

pub fn run(options: Options) -> Result<u8, String> {
    if options.exes.is_empty() {
        return Err(
            "validation error: at least one executable required, use --exe 'Name:path[:id]'"
                .to_owned(),
        );
    }
    if options.bundled && options.wine_path.is_none() {
        return Err("validation error: --wine-path is required for bundled mode".to_owned());
    }

    let icons = keyed_map(&options.icons, "icon")?;
    let descs = keyed_map(&options.exe_descs, "exe-desc")?;
    let args = keyed_map(&options.exe_args, "exe-args")?;

    let mut capture =
        PrefixCapture::new(&options.prefix).map_err(|e| capture_error_message(&e))?;

    let mut seen_ids: BTreeMap<String, u32> = BTreeMap::new();
    for exe_spec in &options.exes {
        let spec = parse_exe_spec(exe_spec, &mut seen_ids)?;
        let spec = ExecutableSpec {
            args: args.get(&spec.id).cloned().unwrap_or_default(),
            description: descs.get(&spec.id).cloned(),
            custom_icon: icons.get(&spec.id).map(PathBuf::from),
            ..spec
        };
        capture
            .add_executable(spec)
            .map_err(|e| capture_error_message(&e))?;
    }

    if options.bundled {
        let wine_path = options.wine_path.as_ref().expect("checked above");
        capture.set_bundled_wine(wine_path);
    } else {
        capture.set_system_wine(Some(options.min_wine_version.clone()));
    }

    if let Some(app_name) = &options.app_name {
        capture.set_app_metadata(AppMetadata {
            name: PackageName::new(app_name.clone()),
            display_name: app_name.clone(),
            version: options.app_version.clone(),
            description: "A Windows application packaged for Linux".to_owned(),
            maintainer: None,
            homepage: None,
            license: "Proprietary".to_owned(),
        });
    }

    capture.set_install_config(InstallConfig {
        use_overlay: options.overlay,
        ..InstallConfig::default()
    });

    for pattern in &options.excludes {
        capture.add_exclusion(pattern.clone());
    }
    for pattern in &options.text_globs {
        capture.add_text_glob(pattern.clone());
    }

    let pb = if options.json {
        None
    } else {
        Some(spinner("capturing prefix..."))
    };
    let manifest = match capture.export(&options.output) {
        Ok(m) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "prefix captured");
            }
            m
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "capture failed");
            }
            return Err(capture_error_message(&e));
        }
    };

    if options.json {
        let payload = serde_json::json!({
            "app_name": manifest.app.name,
            "version": manifest.app.version,
            "executables": manifest.executables.iter().map(|e| e.id.to_string()).collect::<Vec<_>>(),
            "output": options.output,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("captured '{}' to {}", manifest.app.name, options.output.display());
        println!();
        println!("next step: build packages with");
        println!(
            "  uncork build {} -o ./packages --format deb --format pacman",
            options.output.display()
        );
    }
    Ok(EXIT_SUCCESS)
}

/// Parse 'Name:path[:id]', deriving and deduplicating ids from the display
/// name when not given explicitly.
fn parse_exe_spec(
    spec: &str,
    seen_ids: &mut BTreeMap<String, u32>,
) -> Result<ExecutableSpec, String> {
    let parts: Vec<&str> = spec.splitn(3, ':').collect();
    if parts.len() < 2 || parts[0].trim().is_empty() || parts[1].trim().is_empty() {
        return Err(format!(
            "validation error: invalid executable '{spec}', expected 'Name:path[:id]'"
        ));
    }

    let name = parts[0].trim().to_owned();
    let path = parts[1].trim().to_owned();
    let id = match parts.get(2) {
        Some(explicit) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        _ => {
            let base = sanitize_id(&name);
            let count = seen_ids.entry(base.clone()).or_insert(0);
            let id = if *count == 0 {
                base.clone()
            } else {
                format!("{base}-{count}")
            };
            *count += 1;
            id
        }
    };

    Ok(ExecutableSpec {
        id,
        name,
        path,
        ..ExecutableSpec::default()
    })
}

fn keyed_map(options: &[String], what: &str) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for option in options {
        let (key, value) = parse_keyed(option, what)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn capture_error_message(e: &CaptureError) -> String {
    match e {
        CaptureError::Io(_) => e.to_string(),
        _ => format!("validation error: {e}"),
    }
}
