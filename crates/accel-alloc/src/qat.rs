//! QAT physical/virtual function allocation.
//!
//! A [`VirtualFunction`] is always in exactly one place: the PF's available
//! map, or the allocated map of exactly one claimant. The PF service profile
//! is frozen while any VF is allocated.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use accel_core::{pci, PublishedDevice, Services};
use accel_discovery::{PfInfo, PfState, VfDriver, VfInfo};
use tracing::{debug, info, warn};

use crate::error::{AllocError, AllocResult};
use crate::table::Allocation;

/// UID of the shared `/dev/vfio/vfio` container node.
pub const CONTROL_NODE_UID: &str = "qatvf-vfio";

// ── VirtualFunction ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualFunction {
    pub uid: String,
    pub pci_address: String,
    /// PCI address of the owning PF; empty for the control node.
    pub pf_address: String,
    pub driver: VfDriver,
    pub iommu_group: String,
}

impl VirtualFunction {
    fn from_info(info: &VfInfo, pf_address: &str) -> Self {
        Self {
            uid: pci::qat_vf_uid(&info.pci_address),
            pci_address: info.pci_address.clone(),
            pf_address: pf_address.to_string(),
            driver: info.driver.clone(),
            iommu_group: info.iommu_group.clone(),
        }
    }

    /// The VFIO container node every QAT workload needs.
    pub fn control_node() -> Self {
        Self {
            uid: CONTROL_NODE_UID.to_string(),
            pci_address: String::new(),
            pf_address: String::new(),
            driver: VfDriver::VfioPci,
            iommu_group: "vfio".to_string(),
        }
    }

    pub fn device_node(&self) -> String {
        format!("/dev/vfio/{}", self.iommu_group)
    }
}

// ── PhysicalFunction ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PhysicalFunction {
    pub pci_address: String,
    pub device_id: String,
    pub state: PfState,
    pub num_vfs: u64,
    pub total_vfs: u64,
    services: Services,
    allow_reconfiguration: bool,
    sysfs_dir: Option<PathBuf>,
    available: BTreeMap<String, VirtualFunction>,
    /// claimant → VF uid → VF
    allocated: BTreeMap<String, BTreeMap<String, VirtualFunction>>,
}

impl PhysicalFunction {
    pub fn from_info(info: PfInfo, allow_reconfiguration: bool) -> Self {
        let available = info
            .vfs
            .iter()
            .map(|vf| {
                let vf = VirtualFunction::from_info(vf, &info.pci_address);
                (vf.uid.clone(), vf)
            })
            .collect();
        Self {
            pci_address: info.pci_address,
            device_id: info.device_id,
            state: info.state,
            num_vfs: info.num_vfs,
            total_vfs: info.total_vfs,
            services: info.services,
            allow_reconfiguration,
            sysfs_dir: Some(info.sysfs_dir),
            available,
            allocated: BTreeMap::new(),
        }
    }

    /// Drop the sysfs directory so reconfiguration only updates memory.
    pub fn detached(mut self) -> Self {
        self.sysfs_dir = None;
        self
    }

    pub fn services(&self) -> Services {
        self.services
    }

    pub fn allow_reconfiguration(&self) -> bool {
        self.allow_reconfiguration
    }

    pub fn enable_reconfiguration(&mut self, enabled: bool) {
        self.allow_reconfiguration = enabled;
    }

    pub fn available(&self) -> &BTreeMap<String, VirtualFunction> {
        &self.available
    }

    pub fn allocated(&self) -> &BTreeMap<String, BTreeMap<String, VirtualFunction>> {
        &self.allocated
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.values().map(BTreeMap::len).sum()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.available.contains_key(uid) || self.owner_of(uid).is_some()
    }

    pub fn owner_of(&self, uid: &str) -> Option<&str> {
        self.allocated
            .iter()
            .find(|(_, vfs)| vfs.contains_key(uid))
            .map(|(claimant, _)| claimant.as_str())
    }

    /// Every VF, available or allocated.
    pub fn virtual_functions(&self) -> impl Iterator<Item = &VirtualFunction> {
        self.available
            .values()
            .chain(self.allocated.values().flat_map(BTreeMap::values))
    }

    /// True when `uid` is already bound to `claimant` and the profile still
    /// satisfies `request`.
    pub fn check_already_allocated(&self, uid: &str, request: Services, claimant: &str) -> bool {
        if claimant.is_empty() {
            return false;
        }
        let bound = self
            .allocated
            .get(claimant)
            .is_some_and(|vfs| vfs.contains_key(uid));
        bound && self.services.supports(request)
    }

    /// Pick `uid`, or any available VF when `uid` is `None`.
    fn pick_available(&self, uid: Option<&str>) -> Option<String> {
        match uid {
            Some(uid) => self.available.contains_key(uid).then(|| uid.to_string()),
            None => self.available.keys().next().cloned(),
        }
    }

    fn bind(&mut self, uid: &str, claimant: &str) -> Option<String> {
        let vf = self.available.remove(uid)?;
        self.allocated
            .entry(claimant.to_string())
            .or_default()
            .insert(uid.to_string(), vf);
        Some(uid.to_string())
    }

    /// Bind a VF under the current profile.
    pub fn allocate_from_configured(
        &mut self,
        uid: Option<&str>,
        request: Services,
        claimant: &str,
    ) -> Option<String> {
        if claimant.is_empty() || !self.services.supports(request) {
            return None;
        }
        let uid = self.pick_available(uid)?;
        self.bind(&uid, claimant)
    }

    /// Switch the profile to `request` and bind a VF. Only possible while
    /// reconfiguration is enabled and nothing is allocated.
    pub fn allocate_with_reconfiguration(
        &mut self,
        uid: Option<&str>,
        request: Services,
        claimant: &str,
    ) -> AllocResult<Option<String>> {
        if claimant.is_empty()
            || request.is_unset()
            || !self.allow_reconfiguration
            || self.allocated_count() > 0
        {
            return Ok(None);
        }
        let Some(uid) = self.pick_available(uid) else {
            return Ok(None);
        };
        self.reconfigure(request)?;
        Ok(self.bind(&uid, claimant))
    }

    /// Allocate `uid` (or any VF) to `claimant`, trying in order: already
    /// bound, current profile, reconfiguration.
    pub fn allocate(
        &mut self,
        uid: Option<&str>,
        request: Services,
        claimant: &str,
    ) -> AllocResult<Allocation> {
        if claimant.is_empty() {
            return Err(AllocError::EmptyClaimant(uid.unwrap_or_default().to_string()));
        }
        if let Some(uid) = uid {
            if self.check_already_allocated(uid, request, claimant) {
                debug!(%uid, %claimant, "VF already allocated to claim");
                return Ok(Allocation::unchanged(uid));
            }
        }
        if let Some(uid) = self.allocate_from_configured(uid, request, claimant) {
            debug!(%uid, %claimant, services = %self.services, "VF allocated");
            return Ok(Allocation::unchanged(&uid));
        }
        if let Some(uid) = self.allocate_with_reconfiguration(uid, request, claimant)? {
            info!(%uid, %claimant, pf = %self.pci_address, services = %self.services, "VF allocated after reconfiguration");
            return Ok(Allocation {
                device: uid,
                reconfigured: true,
            });
        }
        Err(AllocError::NoCompatibleDevice {
            device: uid.unwrap_or(self.pci_address.as_str()).to_string(),
            services: request.to_string(),
            claimant: claimant.to_string(),
        })
    }

    /// Return `uid` to the available set. With no claimant given, the sole
    /// current owner is used. Returns true when the PF profile was reset; a
    /// failed reset leaves the old profile in place and is only logged.
    pub fn free(&mut self, uid: &str, claimant: Option<&str>) -> AllocResult<bool> {
        let Some(owner) = self.owner_of(uid).map(str::to_string) else {
            return Err(if self.available.contains_key(uid) {
                AllocError::NotAllocated(uid.to_string())
            } else {
                AllocError::UnknownDevice(uid.to_string())
            });
        };
        if let Some(claimant) = claimant.filter(|c| !c.is_empty()) {
            if claimant != owner {
                return Err(AllocError::WrongClaimant {
                    device: uid.to_string(),
                    owner,
                    claimant: claimant.to_string(),
                });
            }
        }

        let vf = self
            .allocated
            .get_mut(&owner)
            .and_then(|vfs| vfs.remove(uid))
            .ok_or_else(|| AllocError::NotAllocated(uid.to_string()))?;
        if self.allocated.get(&owner).is_some_and(BTreeMap::is_empty) {
            self.allocated.remove(&owner);
        }
        self.available.insert(vf.uid.clone(), vf);
        debug!(%uid, claimant = %owner, "VF freed");

        if self.allow_reconfiguration && self.allocated.is_empty() && !self.services.is_none() {
            match self.reconfigure(Services::NONE) {
                Ok(()) => {
                    info!(pf = %self.pci_address, "last VF freed, service profile reset");
                    return Ok(true);
                }
                Err(e) => {
                    warn!(pf = %self.pci_address, error = %e, "last VF freed, service profile reset failed");
                }
            }
        }
        Ok(false)
    }

    /// Write a new service profile to hardware, then record it.
    fn reconfigure(&mut self, services: Services) -> AllocResult<()> {
        if let Some(dir) = &self.sysfs_dir {
            let map_err = |source| AllocError::Reconfigure {
                pf: self.pci_address.clone(),
                services: services.to_string(),
                source,
            };
            let qat_dir = dir.join("qat");
            fs::write(qat_dir.join("state"), PfState::Down.as_str()).map_err(map_err)?;
            fs::write(qat_dir.join("cfg_services"), services.to_string()).map_err(map_err)?;
            fs::write(qat_dir.join("state"), PfState::Up.as_str()).map_err(map_err)?;
        }
        self.services = services;
        self.state = PfState::Up;
        Ok(())
    }

    /// Adopt a fresh scan of this PF, keeping every allocated VF bound to
    /// its claimant.
    pub fn rescan(&mut self, info: PfInfo) {
        if self.allocated.is_empty() {
            self.services = info.services;
        } else if info.services != self.services {
            warn!(pf = %self.pci_address, scanned = %info.services, kept = %self.services,
                "ignoring scanned service profile while VFs are allocated");
        }
        self.state = info.state;
        self.num_vfs = info.num_vfs;
        self.total_vfs = info.total_vfs;
        self.sysfs_dir = self.sysfs_dir.as_ref().map(|_| info.sysfs_dir.clone());

        let mut available = BTreeMap::new();
        for vf_info in &info.vfs {
            let vf = VirtualFunction::from_info(vf_info, &self.pci_address);
            match self.owner_of(&vf.uid).map(str::to_string) {
                Some(owner) => {
                    if let Some(slot) = self
                        .allocated
                        .get_mut(&owner)
                        .and_then(|vfs| vfs.get_mut(&vf.uid))
                    {
                        *slot = vf;
                    }
                }
                None => {
                    available.insert(vf.uid.clone(), vf);
                }
            }
        }
        for (owner, vfs) in &self.allocated {
            for uid in vfs.keys() {
                if !info.vfs.iter().any(|v| pci::qat_vf_uid(&v.pci_address) == *uid) {
                    warn!(%uid, claimant = %owner, "allocated VF missing from rescan, keeping binding");
                }
            }
        }
        self.available = available;
    }
}

// ── QatTable ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct QatTable {
    pfs: Vec<PhysicalFunction>,
    allow_reconfiguration: bool,
    /// VF uid → claimant, for VFs bound while absent from every PF.
    reserved: BTreeMap<String, String>,
}

impl QatTable {
    pub fn new(infos: Vec<PfInfo>, allow_reconfiguration: bool) -> Self {
        Self {
            pfs: infos
                .into_iter()
                .map(|info| PhysicalFunction::from_info(info, allow_reconfiguration))
                .collect(),
            allow_reconfiguration,
            reserved: BTreeMap::new(),
        }
    }

    pub fn pfs(&self) -> &[PhysicalFunction] {
        &self.pfs
    }

    pub fn pf(&self, pci_address: &str) -> Option<&PhysicalFunction> {
        self.pfs.iter().find(|pf| pf.pci_address == pci_address)
    }

    fn pf_holding_mut(&mut self, uid: &str) -> Option<&mut PhysicalFunction> {
        self.pfs.iter_mut().find(|pf| pf.contains(uid))
    }

    fn pf_holding(&self, uid: &str) -> Option<&PhysicalFunction> {
        self.pfs.iter().find(|pf| pf.contains(uid))
    }

    /// Every VF across all PFs, keyed by UID, plus the control node.
    pub fn virtual_functions(&self) -> BTreeMap<String, VirtualFunction> {
        let mut vfs: BTreeMap<String, VirtualFunction> = self
            .pfs
            .iter()
            .flat_map(PhysicalFunction::virtual_functions)
            .map(|vf| (vf.uid.clone(), vf.clone()))
            .collect();
        let control = VirtualFunction::control_node();
        vfs.insert(control.uid.clone(), control);
        vfs
    }

    pub fn allocate(&mut self, uid: &str, request: Services, claimant: &str) -> AllocResult<Allocation> {
        self.pf_holding_mut(uid)
            .ok_or_else(|| AllocError::UnknownDevice(uid.to_string()))?
            .allocate(Some(uid), request, claimant)
    }

    pub fn free(&mut self, uid: &str, claimant: Option<&str>) -> AllocResult<bool> {
        if let Some(pf) = self.pf_holding_mut(uid) {
            return pf.free(uid, claimant);
        }
        let owner = self
            .reserved
            .get(uid)
            .ok_or_else(|| AllocError::UnknownDevice(uid.to_string()))?;
        if let Some(claimant) = claimant.filter(|c| !c.is_empty()) {
            if claimant != owner {
                return Err(AllocError::WrongClaimant {
                    device: uid.to_string(),
                    owner: owner.clone(),
                    claimant: claimant.to_string(),
                });
            }
        }
        self.reserved.remove(uid);
        debug!(%uid, "reservation released");
        Ok(false)
    }

    /// Bind `uid` to `claimant` whether or not any PF holds it yet. An
    /// absent VF is bound as soon as a rescan finds it.
    pub fn reserve(&mut self, uid: &str, claimant: &str) -> AllocResult<()> {
        if claimant.is_empty() {
            return Err(AllocError::EmptyClaimant(uid.to_string()));
        }
        if let Some(pf) = self.pf_holding_mut(uid) {
            return pf.allocate(Some(uid), Services::UNSET, claimant).map(|_| ());
        }
        match self.reserved.get(uid) {
            Some(owner) if owner != claimant => Err(AllocError::WrongClaimant {
                device: uid.to_string(),
                owner: owner.clone(),
                claimant: claimant.to_string(),
            }),
            _ => {
                self.reserved.insert(uid.to_string(), claimant.to_string());
                debug!(%uid, %claimant, "absent VF reserved");
                Ok(())
            }
        }
    }

    pub fn owner(&self, uid: &str) -> Option<&str> {
        match self.pf_holding(uid) {
            Some(pf) => pf.owner_of(uid),
            None => self.reserved.get(uid).map(String::as_str),
        }
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.pf_holding(uid).is_some()
    }

    /// Merge a new scan; PFs with live allocations survive even if missing.
    pub fn rescan(&mut self, infos: Vec<PfInfo>) {
        let mut next = Vec::with_capacity(infos.len());
        let mut old: Vec<PhysicalFunction> = std::mem::take(&mut self.pfs);
        for info in infos {
            match old.iter().position(|pf| pf.pci_address == info.pci_address) {
                Some(idx) => {
                    let mut pf = old.swap_remove(idx);
                    pf.rescan(info);
                    next.push(pf);
                }
                None => next.push(PhysicalFunction::from_info(info, self.allow_reconfiguration)),
            }
        }
        for pf in old {
            if pf.allocated_count() > 0 {
                warn!(pf = %pf.pci_address, "PF missing from rescan but has allocated VFs, keeping");
                next.push(pf);
            } else {
                info!(pf = %pf.pci_address, "PF removed");
            }
        }
        self.pfs = next;

        for (uid, claimant) in std::mem::take(&mut self.reserved) {
            match self.pfs.iter_mut().find(|pf| pf.available.contains_key(&uid)) {
                Some(pf) => {
                    pf.bind(&uid, &claimant);
                    info!(%uid, %claimant, "reserved VF appeared, bound to claim");
                }
                None => {
                    self.reserved.insert(uid, claimant);
                }
            }
        }
    }

    pub fn resources(&self) -> Vec<PublishedDevice> {
        self.pfs
            .iter()
            .flat_map(|pf| {
                pf.virtual_functions().map(move |vf| {
                    PublishedDevice::new(vf.uid.clone())
                        .with_attribute("services", pf.services().to_string())
                        .with_attribute("pfAddress", pf.pci_address.clone())
                })
            })
            .collect()
    }
}
