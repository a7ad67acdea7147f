//! Configuration module

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::FleetError;
use crate::session::SshSettings;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_inventory_path")]
    pub path: PathBuf,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            path: default_inventory_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_directory")]
    pub directory: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_device_timeout_secs")]
    pub device_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            device_timeout_secs: default_device_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,
    #[serde(default = "default_sshpass_binary")]
    pub sshpass_binary: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            sshpass_binary: default_sshpass_binary(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            strict_host_key_checking: false,
        }
    }
}

impl SshConfig {
    pub fn settings(&self) -> SshSettings {
        SshSettings {
            ssh_binary: self.binary.clone(),
            sshpass_binary: self.sshpass_binary.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            strict_host_key_checking: self.strict_host_key_checking,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_save_delay_secs")]
    pub save_delay_secs: u64,
    #[serde(default)]
    pub save_after_configure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            save_delay_secs: default_save_delay_secs(),
            save_after_configure: false,
        }
    }
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("devices/switches.json")
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from("static/backups")
}

fn default_concurrency() -> usize {
    8
}

fn default_device_timeout_secs() -> u64 {
    120
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_sshpass_binary() -> String {
    "sshpass".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_save_delay_secs() -> u64 {
    2
}

impl Config {
    /// `config/default` (optional) overlaid by `SWITCHFLEET__*` env vars
    pub fn load() -> Result<Self, FleetError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("SWITCHFLEET").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.device_timeout_secs)
    }

    pub fn save_delay(&self) -> Duration {
        Duration::from_secs(self.executor.save_delay_secs)
    }
}
