//! NodeState — the claim lifecycle behind a single lock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use accel_alloc::{AllocError, Allocatable, AllocationTable, CONTROL_NODE_UID};
use accel_cdi::devices::gaudi_claim_edits;
use accel_cdi::{
    claim_entry_names, delete_claim_entry, registry_entries, sync_devices, upsert_claim_entry,
    Registry, SyncReport,
};
use accel_core::config::GaudiSettings;
use accel_core::{
    AgentConfig, Claim, Device, DeviceDetails, DriverResources, Family, PreparedClaims,
    PreparedDevice, PreparedResult, Services,
};
use accel_discovery::Inventory;
use accel_ledger::Ledger;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::publish::InventoryPublisher;

/// Static per-node settings.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub node_name: String,
    pub family: Family,
    pub devfs_root: PathBuf,
    pub allow_reconfiguration: bool,
    pub gaudi: GaudiSettings,
}

impl NodeSettings {
    pub fn from_config(config: &AgentConfig, family: Family) -> Self {
        Self {
            node_name: config.node_name.clone(),
            family,
            devfs_root: config.devfs_root.clone(),
            allow_reconfiguration: config.qat.allow_reconfiguration,
            gaudi: config.gaudi.clone(),
        }
    }
}

/// Everything guarded by the node lock.
struct Inner {
    table: AllocationTable,
    registry: Registry,
    ledger: Ledger,
    /// Mirror of the ledger; answers "already prepared" without a read txn.
    prepared: PreparedClaims,
}

/// Shared node state. Clones share the same lock.
#[derive(Clone)]
pub struct NodeState {
    settings: Arc<NodeSettings>,
    publisher: Arc<dyn InventoryPublisher>,
    inner: Arc<Mutex<Inner>>,
}

impl NodeState {
    /// Build the allocation table from `inventory`, sync the registry,
    /// re-apply the ledger and publish the initial inventory.
    pub async fn start(
        settings: NodeSettings,
        inventory: Inventory,
        registry: Registry,
        ledger: Ledger,
        publisher: Arc<dyn InventoryPublisher>,
    ) -> NodeResult<Self> {
        let table = AllocationTable::new(settings.family, inventory, settings.allow_reconfiguration);
        let node = Self {
            settings: Arc::new(settings),
            publisher,
            inner: Arc::new(Mutex::new(Inner {
                table,
                registry,
                ledger,
                prepared: PreparedClaims::new(),
            })),
        };

        {
            let mut inner = node.inner.lock().await;
            node.sync_registry(&mut inner)?;
            node.reconcile(&mut inner)?;
            node.publish_locked(&inner)?;
        }
        info!(
            family = %node.settings.family,
            node = %node.settings.node_name,
            "node state ready"
        );
        Ok(node)
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn family(&self) -> Family {
        self.settings.family
    }

    // ── Claim lifecycle ────────────────────────────────────────────

    /// Allocate every device `claim` asks of this node. A claim already in
    /// the ledger gets its stored result back with no allocation.
    pub async fn prepare(&self, claim: &Claim) -> NodeResult<PreparedResult> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if let Some(result) = inner.prepared.get(&claim.uid) {
            debug!(claim = %claim.uid, "claim already prepared");
            return Ok(result.clone());
        }

        let mut allocated = Vec::new();
        let outcome = match self.allocate_claim(inner, claim, &mut allocated) {
            Ok((devices, reconfigured)) => self
                .add_claim_entry(inner, &claim.uid, devices)
                .map(|devices| (devices, reconfigured)),
            Err(e) => Err(e),
        };
        let (devices, reconfigured) = match outcome {
            Ok(ok) => ok,
            Err(e) => {
                Self::rollback(inner, &claim.uid, &allocated);
                return Err(e);
            }
        };

        let result = PreparedResult { devices };
        if let Err(e) = inner.ledger.put_claim(&claim.uid, &result) {
            if self.settings.family == Family::Gaudi {
                if let Err(cdi) = delete_claim_entry(&mut inner.registry, Family::Gaudi, &claim.uid) {
                    warn!(claim = %claim.uid, error = %cdi, "claim entry cleanup failed");
                }
            }
            Self::rollback(inner, &claim.uid, &allocated);
            return Err(e.into());
        }
        inner.prepared.insert(claim.uid.clone(), result.clone());
        info!(claim = %claim.uid, devices = result.devices.len(), "claim prepared");

        if reconfigured {
            self.publish_committed(inner);
        }
        Ok(result)
    }

    /// Release everything prepared for `claim_uid`. Returns whether the
    /// advertised inventory changed. Unknown claims are a no-op.
    pub async fn unprepare(&self, claim_uid: &str) -> NodeResult<bool> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(result) = inner.prepared.get(claim_uid).cloned() else {
            debug!(claim = %claim_uid, "claim not prepared, nothing to release");
            return Ok(false);
        };

        // Nothing is released unless every device still belongs to the claim.
        for device in &result.devices {
            match inner.table.owner(&device.device_name) {
                Some(owner) if owner != claim_uid => {
                    return Err(NodeError::Allocation {
                        claim: claim_uid.to_string(),
                        source: AllocError::WrongClaimant {
                            device: device.device_name.clone(),
                            owner: owner.to_string(),
                            claimant: claim_uid.to_string(),
                        },
                    });
                }
                _ => {}
            }
        }
        inner.ledger.delete_claim(claim_uid)?;
        inner.prepared.remove(claim_uid);

        let mut changed = false;
        for device in &result.devices {
            match inner.table.free(&device.device_name, Some(claim_uid)) {
                Ok(reset) => changed |= reset,
                Err(e) => {
                    warn!(claim = %claim_uid, device = %device.device_name, error = %e, "device already released");
                }
            }
        }
        if self.settings.family == Family::Gaudi {
            if let Err(e) = delete_claim_entry(&mut inner.registry, Family::Gaudi, claim_uid) {
                warn!(claim = %claim_uid, error = %e, "claim entry left behind, removed on next start");
            }
        }
        info!(claim = %claim_uid, changed, "claim unprepared");

        if changed {
            self.publish_committed(inner);
        }
        Ok(changed)
    }

    /// Prepare a batch; each claim succeeds or fails on its own.
    pub async fn prepare_claims(&self, claims: &[Claim]) -> BTreeMap<String, NodeResult<PreparedResult>> {
        let mut results = BTreeMap::new();
        for claim in claims {
            let result = self.prepare(claim).await;
            if let Err(e) = &result {
                warn!(claim = %claim.uid, error = %e, "prepare failed");
            }
            results.insert(claim.uid.clone(), result);
        }
        results
    }

    pub async fn unprepare_claims(&self, claim_uids: &[String]) -> BTreeMap<String, NodeResult<bool>> {
        let mut results = BTreeMap::new();
        for uid in claim_uids {
            let result = self.unprepare(uid).await;
            if let Err(e) = &result {
                warn!(claim = %uid, error = %e, "unprepare failed");
            }
            results.insert(uid.clone(), result);
        }
        results
    }

    fn allocate_claim(
        &self,
        inner: &mut Inner,
        claim: &Claim,
        allocated: &mut Vec<String>,
    ) -> NodeResult<(Vec<PreparedDevice>, bool)> {
        let driver = self.settings.family.driver_name();
        let mut devices: Vec<PreparedDevice> = Vec::new();
        let mut reconfigured = false;

        for request in &claim.results {
            if request.driver != driver || request.pool != self.settings.node_name {
                debug!(claim = %claim.uid, device = %request.device, pool = %request.pool, "not ours, skipping");
                continue;
            }
            if !inner.table.contains(&request.device) {
                return Err(NodeError::UnknownDevice {
                    claim: claim.uid.clone(),
                    device: request.device.clone(),
                    pool: request.pool.clone(),
                });
            }

            let allocation = inner
                .table
                .allocate(&request.device, request.requested_services(), &claim.uid)
                .map_err(|source| NodeError::Allocation {
                    claim: claim.uid.clone(),
                    source,
                })?;
            reconfigured |= allocation.reconfigured;

            if let Some(existing) = devices.iter_mut().find(|d| d.device_name == allocation.device) {
                existing.requests.push(request.request.clone());
                continue;
            }
            allocated.push(allocation.device.clone());
            devices.push(PreparedDevice {
                requests: vec![request.request.clone()],
                pool_name: request.pool.clone(),
                cdi_device_ids: self.cdi_device_ids(&allocation.device),
                device_name: allocation.device,
            });
        }
        Ok((devices, reconfigured))
    }

    fn cdi_device_ids(&self, device: &str) -> Vec<String> {
        let family = self.settings.family;
        let mut ids = vec![family.qualified_name(device)];
        if family == Family::Qat {
            ids.push(family.qualified_name(CONTROL_NODE_UID));
        }
        ids
    }

    /// Gaudi claims get a claim-scoped registry entry, referenced from the
    /// first device.
    fn add_claim_entry(
        &self,
        inner: &mut Inner,
        claim_uid: &str,
        mut devices: Vec<PreparedDevice>,
    ) -> NodeResult<Vec<PreparedDevice>> {
        if self.settings.family != Family::Gaudi || devices.is_empty() {
            return Ok(devices);
        }
        let details: Vec<_> = devices
            .iter()
            .filter_map(|d| inner.table.devices()?.get(&d.device_name))
            .filter_map(|device| match &device.details {
                DeviceDetails::Gaudi(gaudi) => Some(gaudi),
                DeviceDetails::Gpu(_) => None,
            })
            .collect();
        let edits = gaudi_claim_edits(
            &details,
            &self.settings.gaudi.hook_path,
            &self.settings.gaudi.gaudinet_path,
        );
        let qualified = upsert_claim_entry(&mut inner.registry, Family::Gaudi, claim_uid, edits)?;
        if let Some(first) = devices.first_mut() {
            first.cdi_device_ids.push(qualified);
        }
        Ok(devices)
    }

    fn rollback(inner: &mut Inner, claim_uid: &str, allocated: &[String]) {
        for device in allocated.iter().rev() {
            if let Err(e) = inner.table.free(device, Some(claim_uid)) {
                warn!(claim = %claim_uid, %device, error = %e, "rollback free failed");
            }
        }
        if !allocated.is_empty() {
            debug!(claim = %claim_uid, devices = allocated.len(), "partial allocation rolled back");
        }
    }

    // ── Inventory ──────────────────────────────────────────────────

    pub async fn resources(&self) -> DriverResources {
        let inner = self.inner.lock().await;
        self.resources_locked(&inner)
    }

    pub async fn publish(&self) -> NodeResult<()> {
        let inner = self.inner.lock().await;
        self.publish_locked(&inner)
    }

    fn resources_locked(&self, inner: &Inner) -> DriverResources {
        DriverResources {
            driver: self.settings.family.driver_name(),
            pool: self.settings.node_name.clone(),
            devices: inner.table.resources(),
        }
    }

    fn publish_locked(&self, inner: &Inner) -> NodeResult<()> {
        let resources = self.resources_locked(inner);
        self.publisher.publish(&resources)?;
        debug!(devices = resources.devices.len(), "resources published");
        Ok(())
    }

    /// Publish after a change that is already committed. A failure is only
    /// logged; the next publish carries the same state.
    fn publish_committed(&self, inner: &Inner) {
        if let Err(e) = self.publish_locked(inner) {
            warn!(error = %e, "publishing resources failed");
        }
    }

    pub async fn prepared_claims(&self) -> PreparedClaims {
        self.inner.lock().await.prepared.clone()
    }

    /// Merge a fresh scan, keeping live bindings, then sync the registry
    /// and republish.
    pub async fn rescan(&self, inventory: Inventory) -> NodeResult<SyncReport> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.table.rescan(inventory);
        let report = self.sync_registry(inner)?;
        self.publish_committed(inner);
        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            "rescan applied"
        );
        Ok(report)
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Snapshot of single-function devices; empty for QAT.
    pub async fn devices(&self) -> BTreeMap<String, Device> {
        let inner = self.inner.lock().await;
        inner.table.devices().cloned().unwrap_or_default()
    }

    /// Run `update` on the device with `uid` under the lock. Returns `None`
    /// if no such device exists.
    pub async fn update_device<R>(&self, uid: &str, update: impl FnOnce(&mut Device) -> R) -> Option<R> {
        let mut inner = self.inner.lock().await;
        inner.table.device_by_uid_mut(uid).map(update)
    }

    // ── Startup ────────────────────────────────────────────────────

    fn sync_registry(&self, inner: &mut Inner) -> NodeResult<SyncReport> {
        let wanted = registry_entries(&inner.table, &self.settings.devfs_root);
        Ok(sync_devices(&mut inner.registry, self.settings.family, &wanted)?)
    }

    /// Re-bind every ledger entry so memory matches the ledger, then drop
    /// claim entries the ledger no longer knows about.
    ///
    /// Devices missing from the scan are reserved for their claim. A claim
    /// that conflicts with one restored before it is released and removed
    /// from the ledger.
    fn reconcile(&self, inner: &mut Inner) -> NodeResult<()> {
        let mut claims = inner.ledger.list_claims()?;
        let mut dropped = Vec::new();
        for (claim_uid, result) in &claims {
            let mut restored = Vec::new();
            for device in &result.devices {
                let name = &device.device_name;
                let outcome = if inner.table.contains(name) {
                    inner.table.allocate(name, Services::UNSET, claim_uid).map(|_| ())
                } else {
                    warn!(claim = %claim_uid, device = %name, "prepared device not present, holding it for the claim");
                    inner.table.reserve(name, claim_uid)
                };
                match outcome {
                    Ok(()) => restored.push(name.clone()),
                    Err(e) => {
                        warn!(claim = %claim_uid, device = %name, error = %e, "could not restore claim, dropping it");
                        Self::rollback(inner, claim_uid, &restored);
                        dropped.push(claim_uid.clone());
                        break;
                    }
                }
            }
        }
        for claim_uid in &dropped {
            inner.ledger.delete_claim(claim_uid)?;
            claims.remove(claim_uid);
        }

        for stale in claim_entry_names(&inner.registry, self.settings.family)
            .into_iter()
            .filter(|name| !claims.contains_key(name))
        {
            info!(claim = %stale, "removing CDI entry of unknown claim");
            delete_claim_entry(&mut inner.registry, self.settings.family, &stale)?;
        }

        if !claims.is_empty() {
            info!(claims = claims.len(), "prepared claims restored from ledger");
        }
        inner.prepared = claims;
        Ok(())
    }
}
