use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use deploy_store::{InstanceStore, StateLayout};
use std::path::Path;

pub fn run(store_path: &Path, json: bool) -> Result<u8, String> {
    let layout = StateLayout::new(store_path);
    layout
        .initialize()
        .map_err(|e| format!("store error: {e}"))?;
    let records = InstanceStore::new(layout)
        .list()
        .map_err(|e| format!("store error: {e}"))?;

    if json {
        println!("{}", json_pretty(&records)?);
    } else if records.is_empty() {
        println!("no instances found");
    } else {
        println!("{:<18} {:<10} {:<14} UPDATED", "NAME", "STATE", "CONTAINER");
        for record in &records {
            let container = record
                .container_id
                .as_deref()
                .map(|id| id.chars().take(12).collect::<String>())
                .unwrap_or_default();
            println!(
                "{:<18} {:<10} {:<14} {}",
                record.name,
                colorize_state(&record.state.to_string()),
                container,
                record.updated_at
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
