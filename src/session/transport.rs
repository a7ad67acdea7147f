//! Transport seam between the session lifecycle and a concrete management
//! protocol (SSH in production, a scripted fake in tests).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::models::DeviceDescriptor;

/// How a command's completion is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Wait for the device prompt to come back
    ExpectPrompt,
    /// Wait a fixed duration and return whatever arrived
    Timing(Duration),
}

/// Opens transports to devices
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the channel to `device`. Credentials are exchanged afterwards by
    /// [`Transport::authenticate`].
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn Transport>, SessionError>;
}

/// A live channel to one device
#[async_trait]
pub trait Transport: Send {
    /// Complete login and prepare the terminal (paging off)
    async fn authenticate(&mut self) -> Result<(), SessionError>;

    /// Enter privileged mode
    async fn enable(&mut self, secret: &str) -> Result<(), SessionError>;

    /// Enter or leave configuration mode
    async fn set_config_mode(&mut self, enabled: bool) -> Result<(), SessionError>;

    /// Send one command and capture its raw output
    async fn send_command(&mut self, command: &str, mode: SendMode) -> Result<String, SessionError>;

    /// Graceful close
    async fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Immediate, synchronous release; used when the graceful path cannot run
    fn abort(&mut self);
}
