// Configuration load/save functionality

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_DIR: &str = "whoseport";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_PROC_ROOT: &str = "/proc";

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on any single external command (lsof, ps, docker, ...)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Upper bound on process-table entries read while counting children
    #[serde(default = "default_max_child_scan")]
    pub max_child_scan: usize,

    /// Upper bound on `docker inspect` calls when matching a proxy's container IP
    #[serde(default = "default_max_container_inspections")]
    pub max_container_inspections: usize,

    /// Alternate proc mount (e.g. a host /proc bind-mounted into a container)
    #[serde(default)]
    pub proc_root: Option<PathBuf>,

    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    #[serde(default = "default_lsof_binary")]
    pub lsof_binary: String,

    /// Prompt for an action after showing the report
    #[serde(default = "default_interactive")]
    pub interactive: bool,
}

fn default_command_timeout_secs() -> u64 {
    5
}

fn default_max_child_scan() -> usize {
    65_536
}

fn default_max_container_inspections() -> usize {
    64
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_lsof_binary() -> String {
    "lsof".to_string()
}

fn default_interactive() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            max_child_scan: default_max_child_scan(),
            max_container_inspections: default_max_container_inspections(),
            proc_root: None,
            docker_binary: default_docker_binary(),
            lsof_binary: default_lsof_binary(),
            interactive: default_interactive(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("could not determine the user config directory")?;
        Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            log::debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(&path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .context(format!("Failed to create config directory: {:?}", dir))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents).context(format!("Failed to write config file: {:?}", path))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(path)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    /// Proc mount to read from: configured value, then `$HOST_PROC`, then `/proc`
    pub fn proc_root(&self) -> PathBuf {
        Self::resolve_proc_root(self.proc_root.clone(), std::env::var_os("HOST_PROC"))
    }

    fn resolve_proc_root(
        configured: Option<PathBuf>,
        host_proc: Option<std::ffi::OsString>,
    ) -> PathBuf {
        configured
            .or_else(|| host_proc.filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT))
    }
}
