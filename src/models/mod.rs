//! Data models for switch-fleet

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, SessionError};

// ============================================================================
// Platform
// ============================================================================

/// Switch operating system, keyed by the inventory's `device_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "cisco_ios", alias = "cisco_xe")]
    CiscoIos,
    #[serde(rename = "cisco_nxos")]
    CiscoNxos,
    #[serde(rename = "arista_eos")]
    AristaEos,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::CiscoIos => "cisco_ios",
            Platform::CiscoNxos => "cisco_nxos",
            Platform::AristaEos => "arista_eos",
        }
    }

    /// Whether configuration needs privileged (enable) mode first
    pub fn requires_enable(&self) -> bool {
        !matches!(self, Platform::CiscoNxos)
    }

    pub fn disable_paging_command(&self) -> &'static str {
        "terminal length 0"
    }

    pub fn running_config_command(&self) -> &'static str {
        "show running-config"
    }

    pub fn enter_config_command(&self) -> &'static str {
        "configure terminal"
    }

    pub fn exit_config_command(&self) -> &'static str {
        "end"
    }

    pub fn save_config_command(&self) -> &'static str {
        match self {
            Platform::CiscoNxos => "copy running-config startup-config",
            _ => "write memory",
        }
    }

    /// Output fragments the device prints when it rejects a command
    pub fn error_markers(&self) -> &'static [&'static str] {
        match self {
            Platform::CiscoNxos => &["% Invalid command", "% Incomplete command", "ERROR:"],
            _ => &[
                "% Invalid input",
                "% Incomplete command",
                "% Ambiguous command",
                "% Invalid command",
                "% Unknown command",
            ],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cisco_ios" | "cisco_xe" => Ok(Platform::CiscoIos),
            "cisco_nxos" => Ok(Platform::CiscoNxos),
            "arista_eos" => Ok(Platform::AristaEos),
            _ => Err(format!("Unknown device_type: {}", s)),
        }
    }
}

// ============================================================================
// Device Descriptor
// ============================================================================

/// One manageable switch, as read from the inventory
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub host: String,
    #[serde(rename = "device_type")]
    pub platform: Platform,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Enable secret; the login password is offered when absent
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Platform-specific fields passed through to the transport untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DeviceDescriptor {
    pub fn new(host: &str, platform: Platform, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            platform,
            username: username.to_string(),
            password: password.to_string(),
            secret: None,
            port: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn ssh_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }

    pub fn enable_secret(&self) -> &str {
        self.secret.as_deref().unwrap_or(&self.password)
    }

    /// Per-device connect timeout override (`conn_timeout` pass-through field)
    pub fn conn_timeout_secs(&self) -> Option<u64> {
        self.extra.get("conn_timeout").and_then(|v| v.as_u64())
    }
}

impl std::fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("host", &self.host)
            .field("platform", &self.platform)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("extra", &self.extra)
            .finish()
    }
}

// ============================================================================
// Operations
// ============================================================================

/// What a batch should do on every device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read-only command, output returned verbatim
    Query(String),
    /// Ordered configuration commands, optionally followed by a save
    ConfigureSet { commands: Vec<String>, save: bool },
    /// Full running configuration written to the backup directory
    Backup,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Query(_) => "query",
            Operation::ConfigureSet { .. } => "configure",
            Operation::Backup => "backup",
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure,
}

/// A persisted configuration backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub host: String,
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one operation on one device
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub host: String,
    pub status: OperationStatus,
    pub output: String,
    pub error_detail: Option<String>,
    pub failure: Option<FailureKind>,
    pub artifact: Option<BackupArtifact>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn success(host: &str, output: String, artifact: Option<BackupArtifact>) -> Self {
        Self {
            host: host.to_string(),
            status: OperationStatus::Success,
            output,
            error_detail: None,
            failure: None,
            artifact,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(host: &str, error: &SessionError) -> Self {
        Self {
            host: host.to_string(),
            status: OperationStatus::Failure,
            output: String::new(),
            error_detail: Some(error.to_string()),
            failure: Some(error.kind()),
            artifact: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

/// Aggregated result set of one batch, in registry order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: uuid::Uuid,
    pub operation: &'static str,
    pub results: Vec<OperationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(OperationResult::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Backup artifacts produced by a backup batch
    pub fn artifacts(&self) -> impl Iterator<Item = &BackupArtifact> {
        self.results.iter().filter_map(|r| r.artifact.as_ref())
    }
}
