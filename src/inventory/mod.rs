//! Device registry
//!
//! Immutable, ordered set of device descriptors for a batch. Loaded once and
//! handed to each orchestration call behind an `Arc`.

use std::collections::HashSet;
use std::path::Path;

use crate::error::FleetError;
use crate::models::DeviceDescriptor;

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Build a registry from already-parsed descriptors
    pub fn new(devices: Vec<DeviceDescriptor>) -> Result<Self, FleetError> {
        let mut seen = HashSet::new();

        for (idx, device) in devices.iter().enumerate() {
            if device.host.trim().is_empty() {
                return Err(FleetError::InvalidInventory(format!(
                    "device #{} has an empty host",
                    idx + 1
                )));
            }
            if device.username.trim().is_empty() {
                return Err(FleetError::InvalidInventory(format!(
                    "device {} has no username",
                    device.host
                )));
            }
            if !seen.insert(device.host.as_str()) {
                return Err(FleetError::InvalidInventory(format!(
                    "duplicate host {}",
                    device.host
                )));
            }
        }

        Ok(Self { devices })
    }

    /// Parse a JSON array of descriptors
    pub fn from_json_str(json: &str) -> Result<Self, FleetError> {
        let devices: Vec<DeviceDescriptor> = serde_json::from_str(json)
            .map_err(|e| FleetError::InvalidInventory(e.to_string()))?;
        Self::new(devices)
    }

    /// Load the inventory file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FleetError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            FleetError::InvalidInventory(format!("cannot read {}: {}", path.display(), e))
        })?;

        let registry = Self::from_json_str(&raw)?;
        tracing::info!(
            "[Inventory] Loaded {} devices from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn find(&self, host: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.host == host)
    }

    /// Sub-registry holding only the given host
    pub fn select(&self, host: &str) -> Result<Self, FleetError> {
        let device = self
            .find(host)
            .ok_or_else(|| FleetError::DeviceNotFound(host.to_string()))?;
        Ok(Self {
            devices: vec![device.clone()],
        })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
