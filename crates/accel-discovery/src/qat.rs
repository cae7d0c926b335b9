//! QAT discovery: physical functions under `<sysfs>/bus/pci/devices` and
//! the virtual functions linked from them.

use std::fmt;
use std::path::{Path, PathBuf};

use accel_core::{pci, Services};
use tracing::{debug, error, warn};

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::{sriov, sysfs};

pub const SYSFS_DEVICES_PATH: &str = "bus/pci/devices";

/// PCI device ids of QAT physical functions (4xxx generation).
pub const PF_DEVICE_IDS: [&str; 4] = ["0x4940", "0x4942", "0x4944", "0x4946"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfState {
    Up,
    Down,
}

impl PfState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PfState::Up => "up",
            PfState::Down => "down",
        }
    }
}

impl fmt::Display for PfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel driver a VF is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfDriver {
    Unbound,
    VfioPci,
    Unknown(String),
}

impl VfDriver {
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            None | Some("") => VfDriver::Unbound,
            Some("vfio-pci") => VfDriver::VfioPci,
            Some(other) => VfDriver::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VfDriver::Unbound => "",
            VfDriver::VfioPci => "vfio-pci",
            VfDriver::Unknown(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VfInfo {
    pub pci_address: String,
    pub driver: VfDriver,
    pub iommu_group: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PfInfo {
    pub pci_address: String,
    pub device_id: String,
    pub state: PfState,
    pub services: Services,
    pub num_vfs: u64,
    pub total_vfs: u64,
    /// sysfs directory of the PF, used to write a new service profile.
    pub sysfs_dir: PathBuf,
    pub vfs: Vec<VfInfo>,
}

pub fn discover_pfs(sysfs_root: &Path) -> Vec<PfInfo> {
    let devices_dir = sysfs_root.join(SYSFS_DEVICES_PATH);
    let mut pfs = Vec::new();

    let entries = match sysfs::entry_names(&devices_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(?devices_dir, error = %e, "no PCI devices directory, no QAT devices");
            return pfs;
        }
    };
    let pci_re = match pci::address_regex() {
        Ok(re) => re,
        Err(e) => {
            error!(error = %e, "invalid PCI address pattern");
            return pfs;
        }
    };

    for name in entries.iter().filter(|n| pci_re.is_match(n)) {
        let device_dir = devices_dir.join(name);
        let Ok(device_id) = sysfs::read_trimmed(&device_dir.join("device")) else {
            continue;
        };
        if !PF_DEVICE_IDS.contains(&device_id.as_str()) {
            continue;
        }
        match probe_pf(&devices_dir, name, device_id) {
            Ok(pf) => {
                debug!(pf = %pf.pci_address, services = %pf.services, vfs = pf.vfs.len(), "found QAT PF");
                pfs.push(pf);
            }
            Err(e) => warn!(pci_address = %name, error = %e, "skipping QAT PF"),
        }
    }

    pfs
}

fn probe_pf(devices_dir: &Path, pci_address: &str, device_id: String) -> DiscoveryResult<PfInfo> {
    let dir = devices_dir.join(pci_address);
    let state = match sysfs::read_trimmed(&dir.join("qat/state"))?.as_str() {
        "up" => PfState::Up,
        "down" => PfState::Down,
        other => {
            return Err(DiscoveryError::Parse {
                path: dir.join("qat/state"),
                value: other.to_string(),
            });
        }
    };
    let services_path = dir.join("qat/cfg_services");
    let raw_services = sysfs::read_trimmed(&services_path)?;
    let services = raw_services.parse().map_err(|_| DiscoveryError::Parse {
        path: services_path,
        value: raw_services,
    })?;

    let vfs = sriov::virtfn_links(&dir)
        .into_iter()
        .filter_map(|(idx, vf_address)| {
            let vf_dir = devices_dir.join(&vf_address);
            if !vf_dir.is_dir() {
                warn!(pf = %pci_address, virtfn = idx, vf = %vf_address, "virtfn target missing, skipping");
                return None;
            }
            probe_vf(&vf_dir, &vf_address)
        })
        .collect();

    Ok(PfInfo {
        pci_address: pci_address.to_string(),
        device_id,
        state,
        services,
        num_vfs: sysfs::read_u64(&dir.join("sriov_numvfs"))?,
        total_vfs: sysfs::read_u64(&dir.join("sriov_totalvfs"))?,
        sysfs_dir: dir,
        vfs,
    })
}

fn probe_vf(vf_dir: &Path, pci_address: &str) -> Option<VfInfo> {
    let Some(iommu_group) = pci::link_basename(&vf_dir.join("iommu_group")) else {
        warn!(vf = %pci_address, "no IOMMU group, skipping VF");
        return None;
    };
    let driver = pci::link_basename(&vf_dir.join("driver"));
    Some(VfInfo {
        pci_address: pci_address.to_string(),
        driver: VfDriver::from_name(driver.as_deref()),
        iommu_group,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakesysfs::{self, FakeQatPf};

    fn pf(pci: &str, services: &str, vfs: u64) -> FakeQatPf {
        FakeQatPf {
            pci_address: pci.to_string(),
            state: "up".to_string(),
            services: services.to_string(),
            num_vfs: vfs,
            total_vfs: vfs,
        }
    }

    #[test]
    fn discovers_pf_and_vfs() {
        let dir = tempfile::tempdir().unwrap();
        fakesysfs::write_qat(dir.path(), &[pf("0000:4b:00.0", "sym;asym", 2)]).unwrap();

        let pfs = discover_pfs(dir.path());
        assert_eq!(pfs.len(), 1);
        let pf = &pfs[0];
        assert_eq!(pf.state, PfState::Up);
        assert_eq!(pf.services, Services::SYM | Services::ASYM);
        assert_eq!(pf.num_vfs, 2);
        let addresses: Vec<&str> = pf.vfs.iter().map(|v| v.pci_address.as_str()).collect();
        assert_eq!(addresses, ["0000:4b:00.1", "0000:4b:00.2"]);
        assert_eq!(pf.vfs[0].driver, VfDriver::VfioPci);
        assert!(!pf.vfs[0].iommu_group.is_empty());
    }

    #[test]
    fn broken_virtfn_link_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fakesysfs::write_qat(dir.path(), &[pf("0000:4b:00.0", "dc", 2)]).unwrap();
        let pf_dir = dir.path().join(SYSFS_DEVICES_PATH).join("0000:4b:00.0");
        std::os::unix::fs::symlink("/nonexistent/0000:4b:00.9", pf_dir.join("virtfn999")).unwrap();

        let pfs = discover_pfs(dir.path());
        assert_eq!(pfs[0].vfs.len(), 2);
    }

    #[test]
    fn invalid_services_skip_pf() {
        let dir = tempfile::tempdir().unwrap();
        fakesysfs::write_qat(
            dir.path(),
            &[pf("0000:4b:00.0", "bogus", 1), pf("0000:4d:00.0", "", 1)],
        )
        .unwrap();
        let pfs = discover_pfs(dir.path());
        assert_eq!(pfs.len(), 1);
        assert_eq!(pfs[0].services, Services::NONE);
    }

    #[test]
    fn vf_driver_names() {
        assert_eq!(VfDriver::from_name(None), VfDriver::Unbound);
        assert_eq!(VfDriver::from_name(Some("vfio-pci")), VfDriver::VfioPci);
        assert_eq!(
            VfDriver::from_name(Some("4xxxvf")),
            VfDriver::Unknown("4xxxvf".to_string())
        );
    }

    #[test]
    fn empty_sysfs_has_no_pfs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_pfs(dir.path()).is_empty());
    }
}
