//! Dispatcher configuration
//!
//! Resolved in order of priority:
//! 1. Command line (`--config`, `--test-shell-dir`)
//! 2. Environment (`HILRUN_CONFIG`, `HILRUN_TEST_SHELL_DIR`)
//! 3. Config file (`/etc/hilrun/dispatcher.yaml` when present)
//! 4. Built-in defaults

use color_eyre::eyre::{eyre, Result, WrapErr};
use hilrun_overlay::OverlaySettings;
use hilrun_protocols::{Coordinator, InProcessCoordinator, TcpCoordinator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hilrun/dispatcher.yaml";
pub const DEFAULT_TEST_SHELL_DIR: &str = "/usr/share/hilrun/test-shell";
pub const DEFAULT_COORDINATOR_PORT: u16 = 3079;

pub const CONFIG_ENV: &str = "HILRUN_CONFIG";
pub const TEST_SHELL_DIR_ENV: &str = "HILRUN_TEST_SHELL_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Support-script source tree
    #[serde(default = "default_test_shell_dir")]
    pub test_shell_dir: PathBuf,

    /// Remote rendezvous service; in-process when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Parent of the private overlay directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Delay between polls while peers are still arriving
    #[serde(default = "default_poll_delay")]
    pub poll_delay_secs: u64,
}

fn default_test_shell_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TEST_SHELL_DIR)
}

fn default_port() -> u16 {
    DEFAULT_COORDINATOR_PORT
}

fn default_poll_delay() -> u64 {
    1
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            test_shell_dir: default_test_shell_dir(),
            coordinator: None,
            tmp_dir: None,
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub test_shell_dir: Option<PathBuf>,
}

impl DispatcherConfig {
    /// Resolve against the process environment
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with `env` standing in for the process environment
    pub fn resolve<F>(overrides: &ConfigOverrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = overrides
            .config
            .clone()
            .or_else(|| env(CONFIG_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        if let Some(dir) = overrides
            .test_shell_dir
            .clone()
            .or_else(|| env(TEST_SHELL_DIR_ENV).map(PathBuf::from))
        {
            config.test_shell_dir = dir;
        }
        debug!(?config, "dispatcher configuration resolved");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).wrap_err_with(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| eyre!(e))
    }

    pub fn with_test_shell_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.test_shell_dir = dir.into();
        self
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(dir.into());
        self
    }

    pub fn overlay_settings(&self) -> OverlaySettings {
        OverlaySettings::new(&self.test_shell_dir)
    }

    pub fn coordinator(&self) -> Arc<dyn Coordinator> {
        match &self.coordinator {
            Some(remote) => Arc::new(
                TcpCoordinator::new(&remote.host, remote.port)
                    .with_poll_delay(Duration::from_secs(remote.poll_delay_secs)),
            ),
            None => Arc::new(InProcessCoordinator::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_config() {
        let config = DispatcherConfig::from_yaml(
            "test_shell_dir: /opt/shell\ncoordinator:\n  host: coord.lab\ntmp_dir: /var/tmp/hilrun\n",
        )
        .unwrap();
        assert_eq!(config.test_shell_dir, PathBuf::from("/opt/shell"));
        let coordinator = config.coordinator.unwrap();
        assert_eq!(coordinator.port, DEFAULT_COORDINATOR_PORT);
        assert_eq!(coordinator.poll_delay_secs, 1);
        assert_eq!(config.tmp_dir, Some(PathBuf::from("/var/tmp/hilrun")));
    }

    #[test]
    fn test_priority_order() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("dispatcher.yaml");
        std::fs::write(&file, "test_shell_dir: /from/file\n").unwrap();
        let file_str = file.to_string_lossy().to_string();

        let from_env_file = DispatcherConfig::resolve(
            &ConfigOverrides::default(),
            env(&[(CONFIG_ENV, file_str.as_str())]),
        )
        .unwrap();
        assert_eq!(from_env_file.test_shell_dir, PathBuf::from("/from/file"));

        let env_dir = DispatcherConfig::resolve(
            &ConfigOverrides {
                config: Some(file.clone()),
                test_shell_dir: None,
            },
            env(&[(TEST_SHELL_DIR_ENV, "/from/env")]),
        )
        .unwrap();
        assert_eq!(env_dir.test_shell_dir, PathBuf::from("/from/env"));

        let cli_dir = DispatcherConfig::resolve(
            &ConfigOverrides {
                config: Some(file),
                test_shell_dir: Some(PathBuf::from("/from/cli")),
            },
            env(&[(TEST_SHELL_DIR_ENV, "/from/env")]),
        )
        .unwrap();
        assert_eq!(cli_dir.test_shell_dir, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let overrides = ConfigOverrides {
            config: Some(PathBuf::from("/nonexistent/dispatcher.yaml")),
            test_shell_dir: None,
        };
        assert!(DispatcherConfig::resolve(&overrides, env(&[])).is_err());
    }

    #[test]
    fn test_builders() {
        let config = DispatcherConfig::default()
            .with_test_shell_dir("/srv/shell")
            .with_tmp_dir("/srv/tmp")
            .with_coordinator(CoordinatorConfig {
                host: "localhost".to_string(),
                port: 4000,
                poll_delay_secs: 2,
            });
        assert_eq!(config.overlay_settings().test_shell_dir(), Path::new("/srv/shell"));
        assert_eq!(config.tmp_dir, Some(PathBuf::from("/srv/tmp")));
        assert_eq!(config.coordinator.map(|c| c.port), Some(4000));
    }
}
