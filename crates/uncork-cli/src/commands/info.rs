use super::{json_pretty, EXIT_SUCCESS};
use console::Style;
use std::path::Path;
use uncork_spec::{Manifest, WineConfig};

pub fn run(intermediate: &Path, json: bool) -> Result<u8, String> {
    let manifest = Manifest::load(intermediate).map_err(|e| format!("manifest error: {e}"))?;

    if json {
        println!("{}", json_pretty(&manifest)?);
        return Ok(EXIT_SUCCESS);
    }

    let bold = Style::new().bold();
    println!();
    println!("{}", bold.apply_to(&manifest.app.display_name));
    println!("  Package name   {}", manifest.app.name);
    println!("  Version        {}", manifest.app.version);
    println!("  Description    {}", manifest.app.description);
    println!();

    println!("{}", bold.apply_to("Wine configuration:"));
    match &manifest.wine {
        WineConfig::System { min_version } => {
            println!("  Mode           system");
            println!(
                "  Min version    {}",
                min_version.as_deref().unwrap_or("unspecified")
            );
        }
        WineConfig::Bundled { path } => {
            println!("  Mode           bundled");
            println!("  Bundled path   {path}");
        }
    }
    println!();

    println!("{}", bold.apply_to("Executables:"));
    for exe in &manifest.executables {
        let marker = if exe.is_primary { " (primary)" } else { "" };
        println!("  {} [{}]{marker}", exe.name, exe.id);
        println!("    {}", exe.path);
    }
    println!();

    println!("{}", bold.apply_to("Installation:"));
    println!("  System path    {}", manifest.system_path());
    println!("  User data      {}", manifest.user_data_path());
    println!(
        "  Overlay mode   {}",
        if manifest.install.use_overlay { "yes" } else { "no" }
    );
    if let Some(digest) = &manifest.prefix.template_digest {
        println!("  Template       {}", &digest[..16.min(digest.len())]);
    }

    Ok(EXIT_SUCCESS)
}
