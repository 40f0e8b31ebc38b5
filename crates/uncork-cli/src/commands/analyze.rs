use super::{format_size, json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use console::Style;
use std::path::Path;
use uncork_capture::analyze_prefix;

pub fn run(prefix: &Path, json: bool) -> Result<u8, String> {
    let result = analyze_prefix(prefix);

    if json {
        println!("{}", json_pretty(&result)?);
        return Ok(if result.is_valid_prefix {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        });
    }

    let bold = Style::new().bold();
    println!();
    println!("{} {}", bold.apply_to("Prefix:"), result.prefix_path.display());
    println!();

    if !result.is_valid_prefix {
        println!("{}", Style::new().red().apply_to("Not a valid Wine prefix"));
        for warning in &result.warnings {
            println!("  ⚠ {warning}");
        }
        return Ok(EXIT_FAILURE);
    }

    println!("  Architecture   {}", result.arch);
    println!(
        "  Wine version   {}",
        result.wine_version.as_deref().unwrap_or("unknown")
    );
    println!(
        "  User           {}",
        result.detected_user.as_deref().unwrap_or("unknown")
    );
    println!("  Total size     {}", format_size(result.total_size));
    println!("  DXVK           {}", if result.has_dxvk { "yes" } else { "no" });
    println!("  VKD3D          {}", if result.has_vkd3d { "yes" } else { "no" });
    println!();

    if !result.executables.is_empty() {
        println!("{}", bold.apply_to("Detected executables:"));
        for exe in result.executables.iter().take(15) {
            let marker = if exe.probable_app { "*" } else { " " };
            println!("  {marker} {:<40} {:>10}  {}", exe.name, format_size(exe.size), exe.path);
        }
        if result.executables.len() > 15 {
            println!("  ... and {} more", result.executables.len() - 15);
        }
        println!();
        println!("  (* = probable main application)");
    }

    if !result.warnings.is_empty() {
        println!();
        println!("{}", Style::new().yellow().bold().apply_to("Warnings:"));
        for warning in &result.warnings {
            println!("  ⚠ {warning}");
        }
    }

    Ok(EXIT_SUCCESS)
}
