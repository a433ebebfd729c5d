use super::{json_pretty, resolve_config, EXIT_SUCCESS};
use std::path::Path;

pub fn run(
    store_path: &Path,
    env: &str,
    overrides: &[String],
    json: bool,
) -> Result<u8, String> {
    let config = resolve_config(store_path, env, overrides)?;
    if json {
        println!("{}", json_pretty(&config)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("profile:        {}", config.name);
    println!("edition:        {}", config.edition);
    println!("image:          {}", config.image);
    println!("backend:        {}", config.backend);
    println!("log level:      {}", config.log_level);
    println!(
        "heap:           {} - {} bytes",
        config.heap_initial_bytes, config.heap_max_bytes
    );
    println!("page cache:     {} bytes", config.page_cache_bytes);
    println!("bind address:   {}", config.bind_address);
    for (endpoint, port) in config.enabled_ports() {
        println!("{:<15} {port}", format!("{endpoint}:"));
    }
    println!("tls:            {}", config.tls);
    println!(
        "timeouts:       start {}s, drain {}s, probe {}s",
        config.start_timeout_secs, config.drain_timeout_secs, config.probe_timeout_secs
    );
    println!(
        "supervision:    every {}s, give up after {} failures",
        config.check_interval_secs, config.max_consecutive_failures
    );
    println!(
        "retention:      {} days, {} backups",
        config.retention_days, config.retention_count
    );
    Ok(EXIT_SUCCESS)
}
