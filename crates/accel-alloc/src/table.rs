//! The per-family allocation table chosen at startup.

use std::collections::BTreeMap;

use accel_core::{Device, Family, PublishedDevice, Services};
use accel_discovery::Inventory;
use tracing::warn;

use crate::error::AllocResult;
use crate::exclusive::ExclusiveTable;
use crate::qat::QatTable;

/// Outcome of a successful allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub device: String,
    /// The owning function's service profile was changed to satisfy it.
    pub reconfigured: bool,
}

impl Allocation {
    pub fn unchanged(device: &str) -> Self {
        Self {
            device: device.to_string(),
            reconfigured: false,
        }
    }
}

/// Operations node state needs from every family's table.
pub trait Allocatable {
    /// Bind `device` to `claimant`. Re-binding to the same claimant is a no-op.
    fn allocate(&mut self, device: &str, request: Services, claimant: &str) -> AllocResult<Allocation>;

    /// Release `device`. Returns true when the change affects what is
    /// advertised, e.g. a reset service profile.
    fn free(&mut self, device: &str, claimant: Option<&str>) -> AllocResult<bool>;

    /// Bind `device` to `claimant` even if it is not currently discovered.
    /// The binding survives rescans until the device is freed.
    fn reserve(&mut self, device: &str, claimant: &str) -> AllocResult<()>;

    /// Devices to advertise to the scheduler.
    fn resources(&self) -> Vec<PublishedDevice>;

    fn contains(&self, device: &str) -> bool;

    fn owner(&self, device: &str) -> Option<&str>;
}

impl Allocatable for ExclusiveTable {
    fn allocate(&mut self, device: &str, _request: Services, claimant: &str) -> AllocResult<Allocation> {
        ExclusiveTable::allocate(self, device, claimant)
    }

    fn free(&mut self, device: &str, claimant: Option<&str>) -> AllocResult<bool> {
        ExclusiveTable::free(self, device, claimant)
    }

    fn reserve(&mut self, device: &str, claimant: &str) -> AllocResult<()> {
        ExclusiveTable::reserve(self, device, claimant)
    }

    fn resources(&self) -> Vec<PublishedDevice> {
        ExclusiveTable::resources(self)
    }

    fn contains(&self, device: &str) -> bool {
        self.device(device).is_some()
    }

    fn owner(&self, device: &str) -> Option<&str> {
        ExclusiveTable::owner(self, device)
    }
}

impl Allocatable for QatTable {
    fn allocate(&mut self, device: &str, request: Services, claimant: &str) -> AllocResult<Allocation> {
        QatTable::allocate(self, device, request, claimant)
    }

    fn free(&mut self, device: &str, claimant: Option<&str>) -> AllocResult<bool> {
        QatTable::free(self, device, claimant)
    }

    fn reserve(&mut self, device: &str, claimant: &str) -> AllocResult<()> {
        QatTable::reserve(self, device, claimant)
    }

    fn resources(&self) -> Vec<PublishedDevice> {
        QatTable::resources(self)
    }

    fn contains(&self, device: &str) -> bool {
        QatTable::contains(self, device)
    }

    fn owner(&self, device: &str) -> Option<&str> {
        QatTable::owner(self, device)
    }
}

#[derive(Debug, Clone)]
pub enum AllocationTable {
    Gaudi(ExclusiveTable),
    Gpu(ExclusiveTable),
    Qat(QatTable),
}

impl AllocationTable {
    pub fn new(family: Family, inventory: Inventory, allow_reconfiguration: bool) -> Self {
        match (family, inventory) {
            (Family::Qat, Inventory::Qat(pfs)) => {
                AllocationTable::Qat(QatTable::new(pfs, allow_reconfiguration))
            }
            (Family::Gaudi, Inventory::Devices(devices)) => {
                AllocationTable::Gaudi(ExclusiveTable::new(devices))
            }
            (Family::Gpu, Inventory::Devices(devices)) => {
                AllocationTable::Gpu(ExclusiveTable::new(devices))
            }
            (family, _) => {
                warn!(%family, "inventory shape does not match family, starting empty");
                Self::empty(family, allow_reconfiguration)
            }
        }
    }

    fn empty(family: Family, allow_reconfiguration: bool) -> Self {
        match family {
            Family::Gaudi => AllocationTable::Gaudi(ExclusiveTable::default()),
            Family::Gpu => AllocationTable::Gpu(ExclusiveTable::default()),
            Family::Qat => AllocationTable::Qat(QatTable::new(Vec::new(), allow_reconfiguration)),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            AllocationTable::Gaudi(_) => Family::Gaudi,
            AllocationTable::Gpu(_) => Family::Gpu,
            AllocationTable::Qat(_) => Family::Qat,
        }
    }

    /// Merge a fresh scan, preserving every live binding.
    pub fn rescan(&mut self, inventory: Inventory) {
        match (self, inventory) {
            (AllocationTable::Gaudi(t) | AllocationTable::Gpu(t), Inventory::Devices(devices)) => {
                t.rescan(devices)
            }
            (AllocationTable::Qat(t), Inventory::Qat(pfs)) => t.rescan(pfs),
            (table, _) => warn!(family = %table.family(), "ignoring rescan of another family"),
        }
    }

    /// Single-function devices, empty for QAT.
    pub fn devices(&self) -> Option<&BTreeMap<String, Device>> {
        match self {
            AllocationTable::Gaudi(t) | AllocationTable::Gpu(t) => Some(t.devices()),
            AllocationTable::Qat(_) => None,
        }
    }

    pub fn device_by_uid_mut(&mut self, uid: &str) -> Option<&mut Device> {
        match self {
            AllocationTable::Gaudi(t) | AllocationTable::Gpu(t) => t.device_by_uid_mut(uid),
            AllocationTable::Qat(_) => None,
        }
    }

    fn inner(&self) -> &dyn Allocatable {
        match self {
            AllocationTable::Gaudi(t) | AllocationTable::Gpu(t) => t,
            AllocationTable::Qat(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Allocatable {
        match self {
            AllocationTable::Gaudi(t) | AllocationTable::Gpu(t) => t,
            AllocationTable::Qat(t) => t,
        }
    }
}

impl Allocatable for AllocationTable {
    fn allocate(&mut self, device: &str, request: Services, claimant: &str) -> AllocResult<Allocation> {
        self.inner_mut().allocate(device, request, claimant)
    }

    fn free(&mut self, device: &str, claimant: Option<&str>) -> AllocResult<bool> {
        self.inner_mut().free(device, claimant)
    }

    fn reserve(&mut self, device: &str, claimant: &str) -> AllocResult<()> {
        self.inner_mut().reserve(device, claimant)
    }

    fn resources(&self) -> Vec<PublishedDevice> {
        self.inner().resources()
    }

    fn contains(&self, device: &str) -> bool {
        self.inner().contains(device)
    }

    fn owner(&self, device: &str) -> Option<&str> {
        self.inner().owner(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_discovery::fakesysfs::{self, FakeGaudi};
    use accel_core::NamingStyle;

    #[test]
    fn table_matches_family() {
        let dir = tempfile::tempdir().unwrap();
        fakesysfs::write_gaudi(
            dir.path(),
            &[FakeGaudi {
                pci_address: "0000:0f:00.0".to_string(),
                model: "0x1020".to_string(),
                accel_idx: 0,
                module_id: 0,
                uverbs_idx: None,
                pci_root: "0e".to_string(),
            }],
        )
        .unwrap();
        let inventory = accel_discovery::discover(
            Family::Gaudi,
            dir.path(),
            NamingStyle::Classic,
            &Default::default(),
        );
        let mut table = AllocationTable::new(Family::Gaudi, inventory, false);
        assert_eq!(table.family(), Family::Gaudi);
        assert!(table.contains("accel0"));

        table.allocate("accel0", Services::UNSET, "claim").unwrap();
        assert_eq!(table.owner("accel0"), Some("claim"));
        assert_eq!(table.resources().len(), 1);
    }

    #[test]
    fn mismatched_inventory_starts_empty() {
        let table = AllocationTable::new(Family::Qat, Inventory::Devices(BTreeMap::new()), true);
        assert_eq!(table.family(), Family::Qat);
        assert!(table.resources().is_empty());
    }
}
