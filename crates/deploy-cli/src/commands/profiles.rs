use super::{json_pretty, EXIT_SUCCESS};
use deploy_profile::BUILTIN_PRESETS;
use deploy_store::StateLayout;
use std::path::Path;

pub fn run(store_path: &Path, json: bool) -> Result<u8, String> {
    let layout = StateLayout::new(store_path);
    let mut files: Vec<String> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(layout.profiles_dir()) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    files.push(stem.to_owned());
                }
            }
        }
    }
    files.sort();

    if json {
        let payload = serde_json::json!({
            "presets": BUILTIN_PRESETS
                .iter()
                .map(|p| serde_json::json!({
                    "name": p.name,
                    "description": p.description,
                }))
                .collect::<Vec<_>>(),
            "files": files,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("built-in presets:");
        for preset in BUILTIN_PRESETS {
            println!("  {:<10} {}", preset.name, preset.description);
        }
        println!();
        if files.is_empty() {
            println!("no profile files in {}", layout.profiles_dir().display());
        } else {
            println!("profile files ({}):", layout.profiles_dir().display());
            for name in &files {
                println!("  {name}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
