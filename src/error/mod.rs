//! Error handling module
//!
//! Two layers: `FleetError` aborts a request before any device is contacted,
//! `SessionError` belongs to a single device and is folded into that device's
//! `OperationResult` by the orchestrator.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Batch-level errors surfaced directly to the caller
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Invalid inventory: {0}")]
    InvalidInventory(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Lifecycle stage a session was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Connecting,
    Authenticating,
    Elevating,
    Executing,
    Closing,
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStage::Connecting => write!(f, "connecting"),
            SessionStage::Authenticating => write!(f, "authenticating"),
            SessionStage::Elevating => write!(f, "elevating"),
            SessionStage::Executing => write!(f, "executing"),
            SessionStage::Closing => write!(f, "closing"),
        }
    }
}

/// Flat failure classification recorded per device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connect,
    Auth,
    Privilege,
    Execution,
    Write,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Connect => write!(f, "ConnectError"),
            FailureKind::Auth => write!(f, "AuthError"),
            FailureKind::Privilege => write!(f, "PrivilegeError"),
            FailureKind::Execution => write!(f, "ExecutionError"),
            FailureKind::Write => write!(f, "WriteError"),
            FailureKind::Timeout => write!(f, "TimeoutError"),
            FailureKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Per-device errors; never abort a batch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Privileged mode rejected: {0}")]
    Privilege(String),

    /// `position` is 1-based within a configuration set, `None` for single commands
    #[error("{}", describe_execution(.position, .command, .detail))]
    Execution {
        position: Option<usize>,
        command: String,
        detail: String,
    },

    #[error("Backup write failed for {path}: {detail}")]
    Write { path: String, detail: String },

    #[error("Timed out after {} while {stage}", format_budget(.after))]
    Timeout { stage: SessionStage, after: Duration },

    #[error("Cancelled while {stage}")]
    Cancelled { stage: SessionStage },
}

fn describe_execution(position: &Option<usize>, command: &str, detail: &str) -> String {
    match position {
        Some(pos) => format!("Command #{} '{}' failed: {}", pos, command, detail),
        None => format!("Command '{}' failed: {}", command, detail),
    }
}

/// `850ms` below one second, `120s` otherwise
fn format_budget(after: &Duration) -> String {
    if *after < Duration::from_secs(1) {
        format!("{}ms", after.as_millis())
    } else {
        format!("{}s", after.as_secs())
    }
}

impl SessionError {
    pub fn execution(command: &str, detail: impl Into<String>) -> Self {
        SessionError::Execution {
            position: None,
            command: command.to_string(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::Connect(_) => FailureKind::Connect,
            SessionError::Auth(_) => FailureKind::Auth,
            SessionError::Privilege(_) => FailureKind::Privilege,
            SessionError::Execution { .. } => FailureKind::Execution,
            SessionError::Write { .. } => FailureKind::Write,
            SessionError::Timeout { .. } => FailureKind::Timeout,
            SessionError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    pub fn stage(&self) -> SessionStage {
        match self {
            SessionError::Connect(_) => SessionStage::Connecting,
            SessionError::Auth(_) => SessionStage::Authenticating,
            SessionError::Privilege(_) => SessionStage::Elevating,
            SessionError::Execution { .. } | SessionError::Write { .. } => {
                SessionStage::Executing
            }
            SessionError::Timeout { stage, .. } | SessionError::Cancelled { stage } => *stage,
        }
    }
}
