//! Fleet operations offered to callers (CLI, scripts)
//!
//! Validates caller input and device selection before any device is
//! contacted, then hands the operation to the orchestrator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backup::BackupFile;
use crate::error::FleetError;
use crate::inventory::DeviceRegistry;
use crate::models::{BatchReport, Operation};
use crate::orchestrator::BatchOrchestrator;

pub const SHOW_VLAN_COMMAND: &str = "show vlan brief";

const MAX_VLAN_NAME_LEN: usize = 32;

/// Parse a VLAN id from caller input (1..=4094)
pub fn parse_vlan_id(raw: &str) -> Result<u16, FleetError> {
    let id: u16 = raw
        .trim()
        .parse()
        .map_err(|_| FleetError::Validation(format!("VLAN id must be numeric, got '{}'", raw)))?;
    if !(1..=4094).contains(&id) {
        return Err(FleetError::Validation(format!(
            "VLAN id {} out of range 1-4094",
            id
        )));
    }
    Ok(id)
}

fn validate_vlan_name(name: &str) -> Result<(), FleetError> {
    if name.is_empty() || name.len() > MAX_VLAN_NAME_LEN {
        return Err(FleetError::Validation(format!(
            "VLAN name must be 1-{} characters",
            MAX_VLAN_NAME_LEN
        )));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(FleetError::Validation(format!(
            "VLAN name '{}' must not contain whitespace",
            name.escape_default()
        )));
    }
    Ok(())
}

fn validate_port(port: &str) -> Result<(), FleetError> {
    if port.trim().is_empty() || port.chars().any(char::is_control) {
        return Err(FleetError::Validation(format!(
            "invalid port '{}'",
            port.escape_default()
        )));
    }
    Ok(())
}

pub fn create_vlan_commands(vlan_id: u16, name: &str) -> Vec<String> {
    vec![format!("vlan {}", vlan_id), format!("name {}", name)]
}

pub fn assign_vlan_commands(vlan_id: u16, port: &str) -> Vec<String> {
    vec![
        format!("interface {}", port.trim()),
        format!("switchport access vlan {}", vlan_id),
        "exit".to_string(),
    ]
}

pub struct FleetService {
    registry: Arc<DeviceRegistry>,
    orchestrator: BatchOrchestrator,
    save_after_configure: bool,
    shutdown: CancellationToken,
}

impl FleetService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        orchestrator: BatchOrchestrator,
        save_after_configure: bool,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            save_after_configure,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Cancelling this token aborts any batch in flight
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// `show vlan brief` on every device
    pub async fn list_vlans(&self) -> BatchReport {
        self.orchestrator
            .run_until(
                &self.registry,
                &Operation::Query(SHOW_VLAN_COMMAND.to_string()),
                &self.shutdown,
            )
            .await
    }

    /// Create a VLAN on every device
    pub async fn create_vlan(
        &self,
        vlan_id: &str,
        name: &str,
        save: bool,
    ) -> Result<BatchReport, FleetError> {
        let id = parse_vlan_id(vlan_id)?;
        validate_vlan_name(name)?;

        let operation = Operation::ConfigureSet {
            commands: create_vlan_commands(id, name),
            save: save || self.save_after_configure,
        };
        Ok(self
            .orchestrator
            .run_until(&self.registry, &operation, &self.shutdown)
            .await)
    }

    /// Put `port` on `target_host` into access VLAN `vlan_id`
    pub async fn assign_vlan(
        &self,
        vlan_id: &str,
        port: &str,
        target_host: &str,
        save: bool,
    ) -> Result<BatchReport, FleetError> {
        let id = parse_vlan_id(vlan_id)?;
        validate_port(port)?;
        let target = self.registry.select(target_host)?;

        let operation = Operation::ConfigureSet {
            commands: assign_vlan_commands(id, port),
            save: save || self.save_after_configure,
        };
        Ok(self
            .orchestrator
            .run_until(&target, &operation, &self.shutdown)
            .await)
    }

    /// Back up the running configuration of every device
    pub async fn backup_all(&self) -> BatchReport {
        self.orchestrator
            .run_until(&self.registry, &Operation::Backup, &self.shutdown)
            .await
    }

    pub async fn list_backups(&self) -> std::io::Result<Vec<BackupFile>> {
        self.orchestrator.backups().list_backups().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backup::BackupService;
    use crate::error::{FailureKind, SessionError};
    use crate::executor::CommandExecutor;
    use crate::models::{DeviceDescriptor, OperationStatus, Platform};
    use crate::session::mock::{MockBehavior, MockConnector};
    use crate::session::SessionManager;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        connector: Arc<MockConnector>,
        fleet: FleetService,
        _tmp: tempfile::TempDir,
    }

    fn harness(hosts: &[&str], save_after_configure: bool) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        let registry = DeviceRegistry::new(
            hosts
                .iter()
                .map(|h| DeviceDescriptor::new(h, Platform::CiscoIos, "admin", "pw"))
                .collect(),
        )
        .unwrap();
        let orchestrator = BatchOrchestrator::new(
            SessionManager::new(connector.clone(), Duration::from_secs(5)),
            CommandExecutor::new(Duration::from_millis(10)),
            BackupService::new(tmp.path().join("backups")),
            4,
        );
        Harness {
            connector,
            fleet: FleetService::new(Arc::new(registry), orchestrator, save_after_configure),
            _tmp: tmp,
        }
    }

    #[test]
    fn test_parse_vlan_id() {
        assert_eq!(assert_ok!(parse_vlan_id("10")), 10);
        assert_eq!(assert_ok!(parse_vlan_id(" 4094 ")), 4094);
        assert!(matches!(parse_vlan_id("abc"), Err(FleetError::Validation(_))));
        assert!(matches!(parse_vlan_id("0"), Err(FleetError::Validation(_))));
        assert!(matches!(parse_vlan_id("4095"), Err(FleetError::Validation(_))));
        assert!(matches!(parse_vlan_id("-3"), Err(FleetError::Validation(_))));
    }

    #[test]
    fn test_vlan_name_cannot_smuggle_commands() {
        assert_ok!(validate_vlan_name("sales"));
        assert_err!(validate_vlan_name(""));
        assert_err!(validate_vlan_name("sales\nno vlan 1"));
        assert_err!(validate_vlan_name(&"x".repeat(33)));
    }

    #[test]
    fn test_command_sets() {
        assert_eq!(create_vlan_commands(10, "sales"), vec!["vlan 10", "name sales"]);
        assert_eq!(
            assign_vlan_commands(10, "Gi0/1"),
            vec!["interface Gi0/1", "switchport access vlan 10", "exit"]
        );
    }

    #[tokio::test]
    async fn test_list_vlans_mixed_reachability() {
        let h = harness(&["sw1", "sw2"], false);
        h.connector.configure(
            "sw1",
            MockBehavior {
                connect_error: Some(SessionError::Connect("Connection timed out".into())),
                ..Default::default()
            },
        );
        h.connector
            .respond("sw2", SHOW_VLAN_COMMAND, "1    default    active    Gi0/1");

        let report = h.fleet.list_vlans().await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].host, "sw1");
        assert_eq!(report.results[0].status, OperationStatus::Failure);
        assert_eq!(report.results[0].failure, Some(FailureKind::Connect));
        assert_eq!(report.results[1].host, "sw2");
        assert_eq!(report.results[1].status, OperationStatus::Success);
        assert_eq!(report.results[1].output, "1    default    active    Gi0/1");
    }

    #[tokio::test]
    async fn test_create_vlan_rejects_non_numeric_before_contact() {
        let h = harness(&["sw1", "sw2"], false);

        let err = assert_err!(h.fleet.create_vlan("abc", "sales", false).await);

        assert!(matches!(err, FleetError::Validation(_)));
        assert!(h.connector.connects().is_empty());
    }

    #[tokio::test]
    async fn test_create_vlan_applies_to_every_device() {
        let h = harness(&["sw1", "sw2"], false);

        let report = assert_ok!(h.fleet.create_vlan("10", "sales", false).await);

        assert!(report.all_succeeded());
        for host in ["sw1", "sw2"] {
            assert_eq!(h.connector.sent(host), vec!["vlan 10", "name sales"]);
        }
    }

    #[tokio::test]
    async fn test_save_after_configure_setting() {
        let h = harness(&["sw1"], true);

        assert_ok!(h.fleet.create_vlan("10", "sales", false).await);

        assert_eq!(
            h.connector.sent("sw1"),
            vec!["vlan 10", "name sales", "write memory"]
        );
    }

    #[tokio::test]
    async fn test_assign_vlan_unknown_host() {
        let h = harness(&["sw1", "sw2"], false);

        let err = assert_err!(h.fleet.assign_vlan("10", "Gi0/1", "ghost", false).await);

        assert!(matches!(err, FleetError::DeviceNotFound(ref host) if host == "ghost"));
        assert!(h.connector.connects().is_empty());
    }

    #[tokio::test]
    async fn test_assign_vlan_touches_only_target() {
        let h = harness(&["sw1", "sw2"], false);

        let report = assert_ok!(h.fleet.assign_vlan("10", "Gi0/1", "sw2", false).await);

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].host, "sw2");
        assert_eq!(h.connector.connects(), vec!["sw2"]);
        assert_eq!(
            h.connector.sent("sw2"),
            vec!["interface Gi0/1", "switchport access vlan 10", "exit"]
        );
    }

    #[tokio::test]
    async fn test_backup_all_then_list() {
        let h = harness(&["sw1", "sw2"], false);
        h.connector.respond("sw1", "show running-config", "hostname sw1");
        h.connector.respond("sw2", "show running-config", "hostname sw2");

        let report = h.fleet.backup_all().await;
        assert!(report.all_succeeded());
        assert_eq!(report.artifacts().count(), 2);

        let files = assert_ok!(h.fleet.list_backups().await);
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_token_cancels_batch() {
        let h = harness(&["sw1"], false);
        h.fleet.shutdown_token().cancel();

        let report = h.fleet.backup_all().await;

        assert_eq!(report.results[0].failure, Some(FailureKind::Cancelled));
        assert!(h.connector.connects().is_empty());
    }
}
