//! Health monitor — background task feeding telemetry into node state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use accel_core::Device;
use accel_node::NodeState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checker::HealthCache;
use crate::error::HealthResult;
use crate::markers::{Marker, MarkerStore};
use crate::status::{classify, HealthCategory, HealthStatus};
use crate::telemetry::TelemetrySource;

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub interval: Duration,
    /// Treat warnings as healthy and skip their markers.
    pub ignore_warning: bool,
}

pub struct HealthMonitor {
    node: NodeState,
    source: Arc<dyn TelemetrySource>,
    markers: Arc<dyn MarkerStore>,
    policy: HealthPolicy,
    cache: HealthCache,
    /// Set when a health change has not reached the publisher yet.
    publish_pending: bool,
}

impl HealthMonitor {
    pub fn new(
        node: NodeState,
        source: Arc<dyn TelemetrySource>,
        markers: Arc<dyn MarkerStore>,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            node,
            source,
            markers,
            policy,
            cache: HealthCache::new(),
            publish_pending: false,
        }
    }

    /// Poll once and apply the delta. Returns how many devices changed.
    ///
    /// A device's readings are cached only after its state and markers are
    /// updated, so a failed marker write is retried on the next poll. A
    /// failed publish is retried the same way.
    pub async fn tick(&mut self) -> HealthResult<usize> {
        let snapshot = self.source.discover()?;
        let readings = self.source.health(&snapshot)?;
        let (deltas, errors) = self.cache.diff(&readings);
        for e in &errors {
            warn!(error = %e, "health update skipped");
        }
        if deltas.is_empty() && !self.publish_pending {
            return Ok(0);
        }

        let by_pci: BTreeMap<String, String> = self
            .node
            .devices()
            .await
            .into_values()
            .map(|d| (d.pci_address, d.uid))
            .collect();

        let mut updated = 0;
        for (pci_address, changes) in deltas {
            let Some(uid) = by_pci.get(&pci_address) else {
                debug!(%pci_address, "health delta for unknown device");
                self.cache.commit(&pci_address, &changes);
                continue;
            };
            let ignore_warning = self.policy.ignore_warning;
            let healthy = self
                .node
                .update_device(uid, |device| apply_changes(device, &changes, ignore_warning))
                .await;
            let Some(healthy) = healthy else {
                self.cache.commit(&pci_address, &changes);
                continue;
            };
            updated += 1;
            self.publish_pending = true;
            info!(device = %uid, healthy, changes = changes.len(), "device health changed");
            match self.sync_markers(uid, &changes) {
                Ok(()) => self.cache.commit(&pci_address, &changes),
                Err(e) => warn!(device = %uid, error = %e, "taint marker update failed, retrying next poll"),
            }
        }

        if self.publish_pending {
            self.node.publish().await?;
            self.publish_pending = false;
        }
        Ok(updated)
    }

    fn sync_markers(&self, uid: &str, changes: &BTreeMap<HealthCategory, HealthStatus>) -> HealthResult<()> {
        let settings = self.node.settings();
        let driver = settings.family.driver_name();
        for (&category, &status) in changes {
            match classify(status, self.policy.ignore_warning).taint {
                Some(effect) => {
                    let marker = Marker::new(&driver, &settings.node_name, uid, category, effect);
                    self.markers.ensure(&marker)?;
                }
                None => {
                    let name = Marker::name_for(&driver, &settings.node_name, uid, category);
                    self.markers.remove(&name)?;
                }
            }
        }
        Ok(())
    }

    /// Run the polling loop until `shutdown` flips.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.policy.interval, "health monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "health poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Record `changes` on `device` and recompute its overall health across
/// every known category.
fn apply_changes(
    device: &mut Device,
    changes: &BTreeMap<HealthCategory, HealthStatus>,
    ignore_warning: bool,
) -> bool {
    for (category, status) in changes {
        device
            .health_status
            .insert(category.as_str().to_string(), status.as_str().to_string());
    }
    device.healthy = device
        .health_status
        .values()
        .filter_map(|s| HealthStatus::parse(s))
        .all(|status| classify(status, ignore_warning).healthy);
    device.healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::FileMarkerStore;
    use crate::telemetry::JsonFileSource;
    use accel_cdi::Registry;
    use accel_core::{Family, NamingStyle, TelemetrySnapshot};
    use accel_discovery::fakesysfs::{self, FakeGpu};
    use accel_ledger::Ledger;
    use accel_node::{MemoryPublisher, NodeSettings};

    const PCI: &str = "0000:03:00.0";
    const UID: &str = "0000-03-00-0-0x56a0";

    struct Fixture {
        dir: tempfile::TempDir,
        publisher: Arc<MemoryPublisher>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fakesysfs::write_gpus(
                &dir.path().join("sys"),
                &[FakeGpu {
                    pci_address: PCI.to_string(),
                    driver: "i915".to_string(),
                    model: "0x56a0".to_string(),
                    card_idx: 0,
                    renderd_idx: 128,
                    total_vfs: None,
                    autoprobe: None,
                    parent: None,
                }],
            )
            .unwrap();
            Self {
                dir,
                publisher: Arc::new(MemoryPublisher::new()),
            }
        }

        fn write_telemetry(&self, memory_code: u32) {
            let json = format!(
                r#"{{"devices": [{{"pci_address": "{PCI}", "model_name": "Arc A770", "memory_mib": 16384,
                    "health": {{"core-thermal": 1, "memory": {memory_code}, "power": 1}}}}]}}"#
            );
            std::fs::write(self.dir.path().join("telemetry.json"), json).unwrap();
        }

        async fn monitor(&self, ignore_warning: bool) -> (HealthMonitor, NodeState) {
            let settings = NodeSettings {
                node_name: "node-a".to_string(),
                family: Family::Gpu,
                devfs_root: "/".into(),
                allow_reconfiguration: false,
                gaudi: Default::default(),
            };
            let inventory = accel_discovery::discover(
                Family::Gpu,
                &self.dir.path().join("sys"),
                NamingStyle::Machine,
                &TelemetrySnapshot::new(),
            );
            let registry = Registry::open(&self.dir.path().join("cdi")).unwrap();
            let node = NodeState::start(
                settings,
                inventory,
                registry,
                Ledger::open_in_memory().unwrap(),
                self.publisher.clone(),
            )
            .await
            .unwrap();
            let monitor = HealthMonitor::new(
                node.clone(),
                Arc::new(JsonFileSource::new(self.dir.path().join("telemetry.json"))),
                Arc::new(FileMarkerStore::new(self.dir.path().join("markers"))),
                HealthPolicy {
                    interval: Duration::from_millis(10),
                    ignore_warning,
                },
            );
            (monitor, node)
        }

        fn marker_path(&self, category: &str) -> std::path::PathBuf {
            self.dir
                .path()
                .join("markers")
                .join(format!("gpu.intel.com-node-a-{UID}-{category}.json"))
        }
    }

    #[tokio::test]
    async fn critical_flips_device_and_creates_marker() {
        let fx = Fixture::new();
        let (mut monitor, node) = fx.monitor(false).await;

        fx.write_telemetry(1);
        assert_eq!(monitor.tick().await.unwrap(), 0);
        let published = fx.publisher.count();

        fx.write_telemetry(3);
        assert_eq!(monitor.tick().await.unwrap(), 1);
        let device = node.devices().await.into_values().next().unwrap();
        assert!(!device.healthy);
        assert_eq!(device.health_status["Memory"], "Critical");
        assert!(fx.marker_path("memory").exists());
        assert_eq!(fx.publisher.count(), published + 1);
        assert!(fx.publisher.last().unwrap().devices.is_empty());

        assert_eq!(monitor.tick().await.unwrap(), 0);

        fx.write_telemetry(1);
        assert_eq!(monitor.tick().await.unwrap(), 1);
        assert!(node.devices().await.into_values().all(|d| d.healthy));
        assert!(!fx.marker_path("memory").exists());
        assert_eq!(fx.publisher.last().unwrap().devices.len(), 1);
    }

    #[tokio::test]
    async fn ignored_warning_stays_healthy() {
        let fx = Fixture::new();
        let (mut monitor, node) = fx.monitor(true).await;

        fx.write_telemetry(2);
        assert_eq!(monitor.tick().await.unwrap(), 1);
        assert!(node.devices().await.into_values().all(|d| d.healthy));
        assert!(!fx.marker_path("memory").exists());
    }

    #[tokio::test]
    async fn invalid_status_is_skipped() {
        let fx = Fixture::new();
        let (mut monitor, node) = fx.monitor(false).await;

        fx.write_telemetry(42);
        assert_eq!(monitor.tick().await.unwrap(), 0);
        assert!(node.devices().await.into_values().all(|d| d.healthy));
    }

    #[tokio::test]
    async fn marker_failure_still_publishes_and_retries() {
        let fx = Fixture::new();
        let (mut monitor, node) = fx.monitor(false).await;
        fx.write_telemetry(1);
        monitor.tick().await.unwrap();
        let published = fx.publisher.count();

        // A regular file where the marker directory belongs.
        let markers = fx.dir.path().join("markers");
        std::fs::write(&markers, b"").unwrap();

        fx.write_telemetry(3);
        assert_eq!(monitor.tick().await.unwrap(), 1);
        assert!(node.devices().await.into_values().all(|d| !d.healthy));
        assert_eq!(fx.publisher.count(), published + 1);
        assert!(fx.publisher.last().unwrap().devices.is_empty());

        std::fs::remove_file(&markers).unwrap();
        assert_eq!(monitor.tick().await.unwrap(), 1);
        assert!(fx.marker_path("memory").exists());

        assert_eq!(monitor.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let fx = Fixture::new();
        fx.write_telemetry(1);
        let (monitor, _node) = fx.monitor(false).await;

        let (tx, rx) = watch::channel(false);
        let handle = monitor.spawn(rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
