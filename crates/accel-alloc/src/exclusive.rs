//! Binary free/bound table for single-function accelerators.

use std::collections::BTreeMap;

use accel_core::{Device, DeviceDetails, PublishedDevice, SriovRole};
use tracing::{debug, warn};

use crate::error::{AllocError, AllocResult};
use crate::table::Allocation;

#[derive(Debug, Clone, Default)]
pub struct ExclusiveTable {
    devices: BTreeMap<String, Device>,
    /// device name → claimant
    bindings: BTreeMap<String, String>,
}

impl ExclusiveTable {
    pub fn new(devices: BTreeMap<String, Device>) -> Self {
        Self {
            devices,
            bindings: BTreeMap::new(),
        }
    }

    pub fn devices(&self) -> &BTreeMap<String, Device> {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn device_by_uid_mut(&mut self, uid: &str) -> Option<&mut Device> {
        self.devices.values_mut().find(|d| d.uid == uid)
    }

    pub fn owner(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }

    pub fn allocate(&mut self, name: &str, claimant: &str) -> AllocResult<Allocation> {
        if claimant.is_empty() {
            return Err(AllocError::EmptyClaimant(name.to_string()));
        }
        if !self.devices.contains_key(name) {
            return Err(AllocError::UnknownDevice(name.to_string()));
        }
        match self.bindings.get(name) {
            Some(owner) if owner == claimant => Ok(Allocation::unchanged(name)),
            Some(_) => Err(AllocError::NoCompatibleDevice {
                device: name.to_string(),
                services: String::new(),
                claimant: claimant.to_string(),
            }),
            None => {
                self.bindings.insert(name.to_string(), claimant.to_string());
                debug!(device = %name, %claimant, "device allocated");
                Ok(Allocation::unchanged(name))
            }
        }
    }

    pub fn free(&mut self, name: &str, claimant: Option<&str>) -> AllocResult<bool> {
        let owner = self.bindings.get(name).ok_or_else(|| {
            if self.devices.contains_key(name) {
                AllocError::NotAllocated(name.to_string())
            } else {
                AllocError::UnknownDevice(name.to_string())
            }
        })?;
        if let Some(claimant) = claimant.filter(|c| !c.is_empty()) {
            if claimant != owner {
                return Err(AllocError::WrongClaimant {
                    device: name.to_string(),
                    owner: owner.clone(),
                    claimant: claimant.to_string(),
                });
            }
        }
        self.bindings.remove(name);
        debug!(device = %name, "device freed");
        Ok(false)
    }

    /// Bind `name` to `claimant` while the device is absent. The binding
    /// holds across rescans, so the device comes back already taken.
    pub fn reserve(&mut self, name: &str, claimant: &str) -> AllocResult<()> {
        if claimant.is_empty() {
            return Err(AllocError::EmptyClaimant(name.to_string()));
        }
        match self.bindings.get(name) {
            Some(owner) if owner != claimant => Err(AllocError::WrongClaimant {
                device: name.to_string(),
                owner: owner.clone(),
                claimant: claimant.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.bindings.insert(name.to_string(), claimant.to_string());
                debug!(device = %name, %claimant, "absent device reserved");
                Ok(())
            }
        }
    }

    /// Replace the device set. Every binding survives, including those of
    /// devices missing from the scan; only freeing releases them.
    pub fn rescan(&mut self, mut devices: BTreeMap<String, Device>) {
        for (name, claimant) in &self.bindings {
            if !devices.contains_key(name) {
                warn!(device = %name, %claimant, "allocated device missing from rescan, keeping binding");
            }
        }
        for (name, device) in devices.iter_mut() {
            if let Some(old) = self.devices.get(name) {
                device.healthy = old.healthy;
                device.health_status = old.health_status.clone();
            }
        }
        self.devices = devices;
    }

    /// Healthy devices, as advertised to the scheduler.
    pub fn resources(&self) -> Vec<PublishedDevice> {
        self.devices
            .iter()
            .filter(|(_, d)| d.healthy)
            .map(|(name, d)| published(name, d))
            .collect()
    }
}

fn published(name: &str, device: &Device) -> PublishedDevice {
    let base = PublishedDevice::new(name)
        .with_attribute("model", device.model_name.as_str())
        .with_attribute("pciRoot", device.pci_root.as_str());
    match &device.details {
        DeviceDetails::Gaudi(_) => base,
        DeviceDetails::Gpu(gpu) => {
            let base = base
                .with_attribute("memoryMiB", gpu.memory_mib)
                .with_attribute("millicores", gpu.millicores)
                .with_attribute("driver", gpu.driver.as_str());
            match &gpu.sriov {
                SriovRole::None => base.with_attribute("sriov", false),
                SriovRole::Parent { max_vfs } => base
                    .with_attribute("sriov", *max_vfs > 0)
                    .with_attribute("maxVFs", *max_vfs),
                SriovRole::Child {
                    parent_uid,
                    vf_index,
                } => base
                    .with_attribute("parentUID", parent_uid.as_str())
                    .with_attribute("vfIndex", *vf_index),
            }
        }
    }
}
