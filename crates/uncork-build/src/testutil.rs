//! Shared fixtures for builder tests.

use std::fs;
use std::path::Path;
use uncork_spec::{
    AppMetadata, Executable, ExeId, InstallConfig, IntermediateLayout, Manifest, PackageName,
    PrefixInfo, WineConfig, SCHEMA_VERSION,
};

pub fn sample_manifest(use_overlay: bool, wine: WineConfig) -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION,
        app: AppMetadata {
            name: PackageName::new("pso"),
            display_name: "Phantasy Star Online".to_owned(),
            version: "1.2.0".to_owned(),
            description: "A space RPG".to_owned(),
            maintainer: Some("Jane <jane@example.com>".to_owned()),
            homepage: Some("https://example.com/pso".to_owned()),
            license: "Proprietary".to_owned(),
        },
        wine,
        prefix: PrefixInfo {
            original_user: "alice".to_owned(),
            arch: "win64".to_owned(),
            wine_version: Some("9.0".to_owned()),
            has_dxvk: false,
            has_vkd3d: false,
            template_digest: None,
        },
        executables: vec![Executable {
            id: ExeId::new("main"),
            name: "Phantasy Star Online".to_owned(),
            path: "drive_c/Games/PSO/pso.exe".to_owned(),
            args: String::new(),
            working_dir: None,
            icon: Some("icons/main.png".to_owned()),
            is_primary: true,
            description: None,
            desktop_entry: true,
            categories: vec!["Game".to_owned()],
        }],
        install: InstallConfig {
            use_overlay,
            ..InstallConfig::default()
        },
        excluded_patterns: Vec::new(),
    }
}

pub fn sample_intermediate(root: &Path, manifest: &Manifest) -> IntermediateLayout {
    let layout = IntermediateLayout::new(root);
    let template = layout.prefix_template_dir();
    fs::create_dir_all(template.join("drive_c/Games/PSO")).unwrap();
    fs::write(template.join("drive_c/Games/PSO/pso.exe"), b"MZ").unwrap();
    fs::write(template.join("system.reg"), "WINE REGISTRY Version 2\n").unwrap();
    fs::create_dir_all(layout.icons_dir()).unwrap();
    fs::write(layout.icons_dir().join("main.png"), b"\x89PNG").unwrap();
    manifest.save(root).unwrap();
    layout
}
