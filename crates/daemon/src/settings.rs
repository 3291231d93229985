//! Settings loading
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `workgate.toml` in the working directory, then `WORKGATE_*` environment
//! variables (e.g. `WORKGATE_MAX_QUEUE_SIZE=500`).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use workgate_api_rpc::server::{DEFAULT_RPC_HOST, DEFAULT_RPC_PORT};
use workgate_core::application::RuntimeConfig;

const CONFIG_FILE: &str = "workgate";
const ENV_PREFIX: &str = "WORKGATE";
const DEFAULT_DB_PATH: &str = "~/.workgate/requests.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Settings only the daemon itself reads
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub log_format: LogFormat,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            rpc_host: DEFAULT_RPC_HOST.to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub daemon: DaemonSettings,
    pub runtime: RuntimeConfig,
}

/// Load from the default file name and the process environment
pub fn load() -> Result<AppConfig> {
    load_from(Config::builder().add_source(File::with_name(CONFIG_FILE).required(false)))
}

fn load_from(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<AppConfig> {
    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("allowed_callback_schemes"),
        )
        .build()
        .context("Failed to read configuration")?;

    // Both views read the same flat key space; unknown keys are ignored
    let mut daemon: DaemonSettings = settings
        .clone()
        .try_deserialize()
        .context("Invalid daemon settings")?;
    let runtime: RuntimeConfig = settings
        .try_deserialize()
        .context("Invalid runtime settings")?;

    runtime
        .validate()
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    daemon.db_path = shellexpand::tilde(&daemon.db_path).into_owned();

    Ok(AppConfig { daemon, runtime })
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<AppConfig> {
        load_from(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.runtime, RuntimeConfig::default());
        assert_eq!(config.daemon.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(config.daemon.log_format, LogFormat::Pretty);
        assert!(config.daemon.db_path.ends_with(".workgate/requests.db"));
        assert!(!config.daemon.db_path.starts_with('~'));
    }

    #[test]
    fn test_file_overrides() {
        let config = from_toml(
            r#"
            max_queue_size = 7
            num_workers = 2
            block_private_ips = false
            allowed_callback_schemes = ["https"]
            rpc_port = 9999
            log_format = "json"
            db_path = "/tmp/workgate-test.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime.max_queue_size, 7);
        assert_eq!(config.runtime.num_workers, 2);
        assert!(!config.runtime.block_private_ips);
        assert_eq!(config.runtime.allowed_callback_schemes, vec!["https"]);
        assert_eq!(config.daemon.rpc_port, 9999);
        assert_eq!(config.daemon.log_format, LogFormat::Json);
        assert_eq!(config.daemon.db_path, "/tmp/workgate-test.db");
        // Untouched values keep their defaults
        assert_eq!(config.runtime.max_sync_concurrency, 10);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = from_toml("num_workers = 0").unwrap_err();
        assert!(err.to_string().contains("num_workers"));
    }
}
