//! Configuration display.

use anyhow::{Result, bail};

use super::load_config;
use crate::table::info_table;

fn or_unset<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "(unset)".to_string(), |v| v.to_string())
}

/// Show the resolved configuration.
pub fn show(project: &str, format: &str) -> Result<()> {
    let config = load_config(project)?;

    match format {
        "toml" => print!("{}", config.to_toml()?),
        "text" => {
            let entries = [
                ("worker threads", config.client.worker_threads.to_string()),
                (
                    "blocking timeout",
                    format!("{:?}", config.client.blocking_timeout()),
                ),
                (
                    "prepared statement cache",
                    config.caches.prepared_statements.to_string(),
                ),
                (
                    "column metadata cache",
                    config.caches.column_metadata.to_string(),
                ),
                ("user type cache", config.caches.user_types.to_string()),
                ("consistency", or_unset(config.defaults.consistency)),
                (
                    "serial consistency",
                    or_unset(config.defaults.serial_consistency),
                ),
                ("tracing", or_unset(config.defaults.tracing)),
                (
                    "retry policy",
                    or_unset(config.defaults.retry_policy.map(|p| format!("{p:?}"))),
                ),
                ("page size", or_unset(config.defaults.page_size)),
            ];
            println!("{}", info_table(&entries));
        }
        other => bail!("Unknown format '{other}' (expected toml or text)"),
    }

    Ok(())
}
