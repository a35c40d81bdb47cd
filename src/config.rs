use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding the staged CSV exports, one file per domain.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Path of the SQLite warehouse file.
    #[serde(default = "default_warehouse_path")]
    pub warehouse_path: PathBuf,
    /// Directory where run reports are written.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data_out")
}

fn default_warehouse_path() -> PathBuf {
    PathBuf::from("warehouse.db")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            warehouse_path: default_warehouse_path(),
            report_dir: default_report_dir(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        if !Path::new(CONFIG_PATH).exists() {
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(CONFIG_PATH).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{CONFIG_PATH}': {e}"))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}
