//! Bring a family's CDI specs in line with its allocation table.

use std::collections::BTreeMap;

use accel_core::Family;
use tracing::{debug, info};

use crate::error::CdiResult;
use crate::registry::Registry;
use crate::spec::{CdiDevice, ContainerEdits, Spec};

/// Device names touched by a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Reconcile every spec of `family`'s kind against `wanted`.
///
/// Entries that no longer match a device are dropped and changed ones are
/// rewritten in place. Claim-scoped entries are left alone. Devices not yet
/// present anywhere are appended to the family's stable spec file, and
/// files left without devices are deleted.
pub fn sync_devices(
    registry: &mut Registry,
    family: Family,
    wanted: &BTreeMap<String, ContainerEdits>,
) -> CdiResult<SyncReport> {
    let kind = family.cdi_kind();
    let mut report = SyncReport::default();
    let mut missing = wanted.clone();

    let existing: Vec<(String, Spec)> = registry
        .specs_of_kind(&kind)
        .map(|file| (file.name(), file.spec.clone()))
        .collect();

    for (name, mut spec) in existing {
        let mut dirty = false;
        let mut kept = Vec::with_capacity(spec.devices.len());
        for mut device in spec.devices.drain(..) {
            if device.is_claim_scoped() {
                kept.push(device);
                continue;
            }
            match missing.remove(&device.name) {
                Some(edits) => {
                    if device.container_edits != edits {
                        device.container_edits = edits;
                        report.updated.push(device.name.clone());
                        dirty = true;
                    }
                    kept.push(device);
                }
                None => {
                    debug!(spec = %name, device = %device.name, "dropping stale CDI device");
                    report.removed.push(device.name);
                    dirty = true;
                }
            }
        }
        spec.devices = kept;
        if dirty {
            registry.write_spec(spec, &name)?;
        }
    }

    if !missing.is_empty() {
        let name = Registry::spec_name(family);
        let mut spec = registry
            .spec(&name)
            .map(|file| file.spec.clone())
            .unwrap_or_else(|| Spec::new(kind.clone()));
        for (device, edits) in missing {
            report.added.push(device.clone());
            spec.devices.push(CdiDevice::new(device, edits));
        }
        registry.write_spec(spec, &name)?;
    }

    if !report.is_empty() {
        info!(
            %kind,
            added = report.added.len(),
            removed = report.removed.len(),
            updated = report.updated.len(),
            "CDI registry synced"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::registry_entries;
    use crate::spec::DeviceNode;
    use accel_alloc::AllocationTable;
    use accel_discovery::fakesysfs::{write_qat, FakeQatPf};
    use accel_discovery::Inventory;

    fn node_edits(path: &str) -> ContainerEdits {
        ContainerEdits {
            device_nodes: vec![DeviceNode::char_device(path, None)],
            ..Default::default()
        }
    }

    #[test]
    fn stale_entries_are_pruned_and_empty_files_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::open(dir.path()).unwrap();

        let mut legacy = Spec::new(Family::Gpu.cdi_kind());
        legacy.devices.push(CdiDevice::new("removed-device", node_edits("/dev/dri/card9")));
        registry.write_spec(legacy, "legacy-gpu").unwrap();

        let mut canonical = Spec::new(Family::Gpu.cdi_kind());
        canonical.devices.push(CdiDevice::new("card0", node_edits("/dev/dri/card7")));
        canonical.devices.push(CdiDevice::new(
            "claim-1",
            ContainerEdits {
                env: vec!["A=1".into()],
                ..Default::default()
            },
        ));
        registry.write_spec(canonical, "intel.com-gpu").unwrap();

        let mut wanted = BTreeMap::new();
        wanted.insert("card0".to_string(), node_edits("/dev/dri/card0"));
        wanted.insert("card1".to_string(), node_edits("/dev/dri/card1"));

        let report = sync_devices(&mut registry, Family::Gpu, &wanted).unwrap();
        assert_eq!(report.removed, ["removed-device"]);
        assert_eq!(report.updated, ["card0"]);
        assert_eq!(report.added, ["card1"]);
        assert!(!registry.spec_path("legacy-gpu").exists());

        let reopened = Registry::open(dir.path()).unwrap();
        let spec = &reopened.spec("intel.com-gpu").unwrap().spec;
        let names: Vec<&str> = spec.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["card0", "claim-1", "card1"]);
        assert_eq!(
            spec.device("card0").unwrap().container_edits.device_nodes[0].path,
            "/dev/dri/card0"
        );

        let again = sync_devices(&mut registry, Family::Gpu, &wanted).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn qat_table_sync_writes_vf_entries() {
        let sysfs = tempfile::tempdir().unwrap();
        write_qat(
            sysfs.path(),
            &[FakeQatPf {
                pci_address: "0000:4b:00.0".into(),
                state: "up".into(),
                services: "sym;asym".into(),
                num_vfs: 2,
                total_vfs: 16,
            }],
        )
        .unwrap();
        let inventory = accel_discovery::qat::discover_pfs(sysfs.path());
        let table = AllocationTable::new(Family::Qat, Inventory::Qat(inventory), false);

        let cdi = tempfile::tempdir().unwrap();
        let mut registry = Registry::open(cdi.path()).unwrap();
        let wanted = registry_entries(&table, std::path::Path::new("/"));
        let report = sync_devices(&mut registry, Family::Qat, &wanted).unwrap();

        assert_eq!(
            report.added,
            ["qatvf-0000-4b-00-1", "qatvf-0000-4b-00-2", "qatvf-vfio"]
        );
        assert!(registry.device("intel.com/qat=qatvf-0000-4b-00-1").is_some());
        let (_, vfio) = registry.device("intel.com/qat=qatvf-vfio").unwrap();
        assert_eq!(vfio.container_edits.device_nodes[0].path, "/dev/vfio/vfio");
    }
}
