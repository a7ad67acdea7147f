//! Scripted in-memory transport for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::models::DeviceDescriptor;
use crate::session::transport::{Connector, SendMode, Transport};

/// Per-host script
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub connect_error: Option<SessionError>,
    pub auth_error: Option<SessionError>,
    pub enable_error: Option<SessionError>,
    /// Fail when this command is sent
    pub fail_on: Option<(String, SessionError)>,
    pub command_delay: Option<Duration>,
    pub disconnect_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct MockLog {
    connects: Vec<String>,
    sent: HashMap<String, Vec<String>>,
    timing: HashMap<String, Vec<(String, Duration)>>,
    config_mode: HashMap<String, Vec<bool>>,
    enabled: Vec<String>,
    teardowns: HashMap<String, usize>,
    aborts: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MockConnector {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    responses: Arc<Mutex<HashMap<(String, String), String>>>,
    log: Arc<Mutex<MockLog>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&self, host: &str, behavior: MockBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(host.to_string(), behavior);
    }

    pub fn respond(&self, host: &str, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert((host.to_string(), command.to_string()), output.to_string());
    }

    pub fn connects(&self) -> Vec<String> {
        self.log.lock().unwrap().connects.clone()
    }

    pub fn sent(&self, host: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .sent
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    pub fn timing_sent(&self, host: &str) -> Vec<(String, Duration)> {
        self.log
            .lock()
            .unwrap()
            .timing
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    pub fn config_mode_changes(&self, host: &str) -> Vec<bool> {
        self.log
            .lock()
            .unwrap()
            .config_mode
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    pub fn was_enabled(&self, host: &str) -> bool {
        self.log.lock().unwrap().enabled.iter().any(|h| h == host)
    }

    /// Forced releases only
    pub fn aborts(&self, host: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .aborts
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    pub fn teardowns(&self, host: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .teardowns
            .get(host)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn Transport>, SessionError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&device.host)
            .cloned()
            .unwrap_or_default();

        tracing::debug!("[Mock] connect {}", device.host);
        self.log.lock().unwrap().connects.push(device.host.clone());

        if let Some(err) = behavior.connect_error.clone() {
            return Err(err);
        }

        Ok(Box::new(MockTransport {
            host: device.host.clone(),
            behavior,
            responses: self.responses.clone(),
            log: self.log.clone(),
        }))
    }
}

struct MockTransport {
    host: String,
    behavior: MockBehavior,
    responses: Arc<Mutex<HashMap<(String, String), String>>>,
    log: Arc<Mutex<MockLog>>,
}

impl MockTransport {
    /// Every call counts, so a double close shows up as 2
    fn record_teardown(&mut self) {
        *self
            .log
            .lock()
            .unwrap()
            .teardowns
            .entry(self.host.clone())
            .or_insert(0) += 1;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn authenticate(&mut self) -> Result<(), SessionError> {
        match self.behavior.auth_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn enable(&mut self, _secret: &str) -> Result<(), SessionError> {
        if let Some(err) = self.behavior.enable_error.clone() {
            return Err(err);
        }
        self.log.lock().unwrap().enabled.push(self.host.clone());
        Ok(())
    }

    async fn set_config_mode(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.log
            .lock()
            .unwrap()
            .config_mode
            .entry(self.host.clone())
            .or_default()
            .push(enabled);
        Ok(())
    }

    async fn send_command(&mut self, command: &str, mode: SendMode) -> Result<String, SessionError> {
        if let Some(delay) = self.behavior.command_delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut log = self.log.lock().unwrap();
            log.sent
                .entry(self.host.clone())
                .or_default()
                .push(command.to_string());
            if let SendMode::Timing(delay) = mode {
                log.timing
                    .entry(self.host.clone())
                    .or_default()
                    .push((command.to_string(), delay));
            }
        }

        if let Some((failing, err)) = &self.behavior.fail_on {
            if failing == command {
                return Err(err.clone());
            }
        }

        let output = self
            .responses
            .lock()
            .unwrap()
            .get(&(self.host.clone(), command.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(output)
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        if let Some(delay) = self.behavior.disconnect_delay {
            tokio::time::sleep(delay).await;
        }
        self.record_teardown();
        Ok(())
    }

    fn abort(&mut self) {
        *self
            .log
            .lock()
            .unwrap()
            .aborts
            .entry(self.host.clone())
            .or_insert(0) += 1;
        self.record_teardown();
    }
}
