//! Batch orchestrator
//!
//! Fans one operation out over every device in a registry. Devices run on a
//! bounded pool of concurrent sessions; results come back in registry order.
//! A device failure becomes a `Failure` entry and never stops the batch.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::backup::BackupService;
use crate::error::SessionError;
use crate::executor::CommandExecutor;
use crate::inventory::DeviceRegistry;
use crate::models::{BackupArtifact, BatchReport, DeviceDescriptor, Operation, OperationResult};
use crate::session::SessionManager;

#[derive(Clone)]
pub struct BatchOrchestrator {
    sessions: SessionManager,
    executor: CommandExecutor,
    backups: BackupService,
    concurrency: usize,
}

impl BatchOrchestrator {
    /// `concurrency` caps simultaneous sessions; 0 is treated as 1
    pub fn new(
        sessions: SessionManager,
        executor: CommandExecutor,
        backups: BackupService,
        concurrency: usize,
    ) -> Self {
        Self {
            sessions,
            executor,
            backups,
            concurrency: concurrency.max(1),
        }
    }

    pub fn backups(&self) -> &BackupService {
        &self.backups
    }

    /// Run `operation` on every device of `registry`
    pub async fn run(&self, registry: &DeviceRegistry, operation: &Operation) -> BatchReport {
        self.run_until(registry, operation, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run); once `cancel` fires every outstanding device
    /// is closed and recorded as cancelled
    pub async fn run_until(
        &self,
        registry: &DeviceRegistry,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();

        tracing::info!(
            "[Orchestrator] Batch {} ({}) over {} devices, concurrency {}",
            batch_id,
            operation.name(),
            registry.len(),
            self.concurrency
        );

        // A free slot starts the next device right away; results are put
        // back into registry order afterwards
        let mut indexed: Vec<(usize, OperationResult)> = stream::iter(registry.devices())
            .enumerate()
            .map(|(idx, device)| {
                let span = tracing::info_span!("device", batch = %batch_id, host = %device.host);
                self.run_device(device, operation, cancel)
                    .map(move |result| (idx, result))
                    .instrument(span)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(idx, _)| *idx);
        let results: Vec<OperationResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let report = BatchReport {
            batch_id,
            operation: operation.name(),
            results,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            "[Orchestrator] Batch {} finished: {}/{} succeeded",
            batch_id,
            report.success_count(),
            report.results.len()
        );
        report
    }

    async fn run_device(
        &self,
        device: &DeviceDescriptor,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> OperationResult {
        match self.execute(device, operation, cancel).await {
            Ok((output, artifact)) => {
                tracing::debug!("[Orchestrator] {} succeeded", device.host);
                OperationResult::success(&device.host, output, artifact)
            }
            Err(e) => {
                tracing::warn!("[Orchestrator] {} failed: {}", device.host, e);
                OperationResult::failure(&device.host, &e)
            }
        }
    }

    async fn execute(
        &self,
        device: &DeviceDescriptor,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> Result<(String, Option<BackupArtifact>), SessionError> {
        match operation {
            Operation::Query(command) => {
                let executor = self.executor.clone();
                let command = command.clone();
                let output = self
                    .sessions
                    .with_session_until(device, cancel, move |s| {
                        Box::pin(async move { executor.query(s, &command).await })
                    })
                    .await?;
                Ok((output, None))
            }
            Operation::ConfigureSet { commands, save } => {
                let executor = self.executor.clone();
                let commands = commands.clone();
                let save = *save;
                let output = self
                    .sessions
                    .with_session_until(device, cancel, move |s| {
                        Box::pin(async move {
                            let mut output = executor.configure(s, &commands).await?;
                            if save {
                                let saved = executor.save_running_config(s).await?;
                                if !saved.is_empty() {
                                    output.push('\n');
                                    output.push_str(&saved);
                                }
                            }
                            Ok::<_, SessionError>(output)
                        })
                    })
                    .await?;
                Ok((output, None))
            }
            Operation::Backup => {
                let backups = self.backups.clone();
                let artifact = self
                    .sessions
                    .with_session_until(device, cancel, move |s| {
                        Box::pin(async move { backups.backup(s).await })
                    })
                    .await?;
                Ok((artifact.path.display().to_string(), Some(artifact)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::FailureKind;
    use crate::models::{OperationStatus, Platform};
    use crate::session::mock::{MockBehavior, MockConnector};

    fn registry(hosts: &[&str]) -> DeviceRegistry {
        DeviceRegistry::new(
            hosts
                .iter()
                .map(|h| DeviceDescriptor::new(h, Platform::CiscoIos, "admin", "pw"))
                .collect(),
        )
        .unwrap()
    }

    fn orchestrator(
        connector: &Arc<MockConnector>,
        timeout: Duration,
        backup_dir: &std::path::Path,
    ) -> BatchOrchestrator {
        BatchOrchestrator::new(
            SessionManager::new(connector.clone(), timeout),
            CommandExecutor::new(Duration::from_millis(10)),
            BackupService::new(backup_dir),
            4,
        )
    }

    fn unreachable() -> MockBehavior {
        MockBehavior {
            connect_error: Some(SessionError::Connect(
                "ssh: connect to host sw1 port 22: No route to host".into(),
            )),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_one_result_per_device_in_registry_order() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        // first device is the slowest to finish
        connector.configure(
            "sw1",
            MockBehavior {
                command_delay: Some(Duration::from_millis(80)),
                ..Default::default()
            },
        );
        let hosts = ["sw1", "sw2", "sw3", "sw4", "sw5"];
        let orch = orchestrator(&connector, Duration::from_secs(5), tmp.path());

        let report = orch
            .run(&registry(&hosts), &Operation::Query("show vlan brief".into()))
            .await;

        let got: Vec<&str> = report.results.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(got, hosts);
        assert!(report.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_device_does_not_hold_back_free_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.configure(
            "sw1",
            MockBehavior {
                command_delay: Some(Duration::from_millis(400)),
                ..Default::default()
            },
        );
        for host in ["sw2", "sw3", "sw4"] {
            connector.configure(
                host,
                MockBehavior {
                    command_delay: Some(Duration::from_millis(100)),
                    ..Default::default()
                },
            );
        }
        let orch = BatchOrchestrator::new(
            SessionManager::new(connector.clone(), Duration::from_secs(5)),
            CommandExecutor::new(Duration::from_millis(10)),
            BackupService::new(tmp.path()),
            2,
        );
        let started = tokio::time::Instant::now();

        let report = orch
            .run(
                &registry(&["sw1", "sw2", "sw3", "sw4"]),
                &Operation::Query("show vlan brief".into()),
            )
            .await;

        // sw2, sw3, sw4 run back to back in the second slot while sw1 is busy
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
        let got: Vec<&str> = report.results.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(got, ["sw1", "sw2", "sw3", "sw4"]);
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn test_unreachable_device_does_not_affect_others() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.configure("sw1", unreachable());
        connector.respond("sw2", "show vlan brief", "10   sales   active");
        let orch = orchestrator(&connector, Duration::from_secs(5), tmp.path());

        let report = orch
            .run(&registry(&["sw1", "sw2"]), &Operation::Query("show vlan brief".into()))
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].host, "sw1");
        assert_eq!(report.results[0].status, OperationStatus::Failure);
        assert_eq!(report.results[0].failure, Some(FailureKind::Connect));
        assert_eq!(report.results[1].host, "sw2");
        assert_eq!(report.results[1].status, OperationStatus::Success);
        assert_eq!(report.results[1].output, "10   sales   active");
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn test_configure_failure_does_not_short_circuit() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.configure("sw1", unreachable());
        let orch = BatchOrchestrator::new(
            SessionManager::new(connector.clone(), Duration::from_secs(5)),
            CommandExecutor::new(Duration::from_millis(10)),
            BackupService::new(tmp.path()),
            1,
        );
        let op = Operation::ConfigureSet {
            commands: vec!["vlan 10".into(), "name sales".into()],
            save: false,
        };

        let report = orch.run(&registry(&["sw1", "sw2", "sw3"]), &op).await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(connector.connects(), vec!["sw1", "sw2", "sw3"]);
        assert_eq!(
            connector.sent("sw3"),
            vec!["vlan 10".to_string(), "name sales".to_string()]
        );
    }

    #[tokio::test]
    async fn test_configure_with_save() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.respond("sw1", "write memory", "[OK]");
        let orch = orchestrator(&connector, Duration::from_secs(5), tmp.path());
        let op = Operation::ConfigureSet {
            commands: vec!["vlan 20".into()],
            save: true,
        };

        let report = orch.run(&registry(&["sw1"]), &op).await;

        assert!(report.all_succeeded());
        assert!(report.results[0].output.contains("[OK]"));
        assert_eq!(
            connector.sent("sw1"),
            vec!["vlan 20".to_string(), "write memory".to_string()]
        );
        assert_eq!(connector.timing_sent("sw1").len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_recorded_as_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.configure(
            "slow",
            MockBehavior {
                command_delay: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        );
        let orch = orchestrator(&connector, Duration::from_millis(100), tmp.path());

        let report = orch
            .run(&registry(&["slow", "fast"]), &Operation::Query("show clock".into()))
            .await;

        assert_eq!(report.results[0].failure, Some(FailureKind::Timeout));
        assert!(report.results[1].is_success());
        assert_eq!(connector.teardowns("slow"), 1);
        assert_eq!(connector.teardowns("fast"), 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_every_session() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        let hosts = ["sw1", "sw2", "sw3"];
        for host in hosts {
            connector.configure(
                host,
                MockBehavior {
                    command_delay: Some(Duration::from_secs(60)),
                    ..Default::default()
                },
            );
        }
        let orch = orchestrator(&connector, Duration::from_secs(120), tmp.path());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let report = orch
            .run_until(
                &registry(&hosts),
                &Operation::Query("show running-config".into()),
                &cancel,
            )
            .await;

        assert_eq!(report.results.len(), 3);
        for (result, host) in report.results.iter().zip(hosts) {
            assert_eq!(result.host, host);
            assert_eq!(result.failure, Some(FailureKind::Cancelled));
            assert_eq!(connector.teardowns(host), 1);
        }
    }

    #[tokio::test]
    async fn test_precancelled_batch_contacts_nobody() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        let orch = orchestrator(&connector, Duration::from_secs(5), tmp.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orch
            .run_until(&registry(&["sw1", "sw2"]), &Operation::Backup, &cancel)
            .await;

        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| r.failure == Some(FailureKind::Cancelled)));
        assert!(connector.connects().is_empty());
    }

    #[tokio::test]
    async fn test_backup_batch_produces_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.respond("sw1", "show running-config", "hostname sw1");
        connector.configure("sw2", unreachable());
        connector.respond("sw3", "show running-config", "hostname sw3");
        let orch = orchestrator(&connector, Duration::from_secs(5), &tmp.path().join("backups"));

        let report = orch
            .run(&registry(&["sw1", "sw2", "sw3"]), &Operation::Backup)
            .await;

        let artifacts: Vec<&BackupArtifact> = report.artifacts().collect();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].host, "sw1");
        assert_eq!(artifacts[1].host, "sw3");
        assert_eq!(report.results[1].failure, Some(FailureKind::Connect));
        assert_eq!(
            std::fs::read_to_string(&artifacts[1].path).unwrap(),
            "hostname sw3"
        );
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let connector = Arc::new(MockConnector::new());
        let orch = BatchOrchestrator::new(
            SessionManager::new(connector, Duration::from_secs(1)),
            CommandExecutor::new(Duration::from_millis(10)),
            BackupService::new("unused"),
            0,
        );
        assert_eq!(orch.concurrency, 1);
    }
}
