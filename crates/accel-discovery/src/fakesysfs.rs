//! Builders for fake sysfs trees, used by tests.
//!
//! Layouts mirror the kernel: device directories live under
//! `devices/pci0000:XX/` and driver directories hold relative symlinks to
//! them, so PCI-root and parent-link resolution behave as on real hosts.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FakeGaudi {
    pub pci_address: String,
    pub model: String,
    pub accel_idx: u64,
    pub module_id: u64,
    pub uverbs_idx: Option<u64>,
    pub pci_root: String,
}

#[derive(Debug, Clone)]
pub struct FakeGpu {
    pub pci_address: String,
    pub driver: String,
    pub model: String,
    pub card_idx: u64,
    pub renderd_idx: u64,
    pub total_vfs: Option<u64>,
    pub autoprobe: Option<String>,
    /// `(parent PCI address, virtfn index)` for virtual functions.
    pub parent: Option<(String, u64)>,
}

#[derive(Debug, Clone)]
pub struct FakeQatPf {
    pub pci_address: String,
    pub state: String,
    pub services: String,
    pub num_vfs: u64,
    pub total_vfs: u64,
}

fn write(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{contents}\n"))
}

fn link(target: &str, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    symlink(target, path)
}

fn driver_link(root: &Path, driver: &str, pci_root: &str, pci_address: &str) -> io::Result<()> {
    link(
        &format!("../../../../devices/pci0000:{pci_root}/{pci_address}"),
        &root.join("bus/pci/drivers").join(driver).join(pci_address),
    )
}

pub fn write_gaudi(root: &Path, devices: &[FakeGaudi]) -> io::Result<()> {
    for dev in devices {
        let dir = root
            .join(format!("devices/pci0000:{}", dev.pci_root))
            .join(&dev.pci_address);
        write(&dir.join("device"), &dev.model)?;
        write(&dir.join("module_id"), &dev.module_id.to_string())?;
        fs::create_dir_all(dir.join(format!("accel/accel{}", dev.accel_idx)))?;
        fs::create_dir_all(dir.join(format!("accel/accel_controlD{}", dev.accel_idx)))?;
        if let Some(uverbs) = dev.uverbs_idx {
            fs::create_dir_all(dir.join(format!("infiniband_verbs/uverbs{uverbs}")))?;
        }
        driver_link(root, "habanalabs", &dev.pci_root, &dev.pci_address)?;
    }
    Ok(())
}

pub fn write_gpus(root: &Path, devices: &[FakeGpu]) -> io::Result<()> {
    let devices_dir = root.join("devices/pci0000:00");
    for dev in devices {
        let dir = devices_dir.join(&dev.pci_address);
        write(&dir.join("device"), &dev.model)?;
        fs::create_dir_all(dir.join(format!("drm/card{}", dev.card_idx)))?;
        fs::create_dir_all(dir.join(format!("drm/renderD{}", dev.renderd_idx)))?;
        if let Some(total) = dev.total_vfs {
            write(&dir.join("sriov_totalvfs"), &total.to_string())?;
        }
        if let Some(flag) = &dev.autoprobe {
            write(&dir.join("sriov_drivers_autoprobe"), flag)?;
        }
        if let Some((parent, idx)) = &dev.parent {
            link(&format!("../{parent}"), &dir.join("physfn"))?;
            link(
                &format!("../{}", dev.pci_address),
                &devices_dir.join(parent).join(format!("virtfn{idx}")),
            )?;
        }
        driver_link(root, &dev.driver, "00", &dev.pci_address)?;
    }
    Ok(())
}

/// Address of the `n`-th (1-based) VF behind a PF at function 0.
pub fn vf_address(pf_address: &str, n: u64) -> String {
    let (prefix, _) = pf_address.rsplit_once(':').unwrap_or((pf_address, ""));
    format!("{prefix}:{:02x}.{}", n / 8, n % 8)
}

pub fn write_qat(root: &Path, pfs: &[FakeQatPf]) -> io::Result<()> {
    let devices_dir = root.join("bus/pci/devices");
    let mut iommu_group = 0u64;
    for pf in pfs {
        let dir = devices_dir.join(&pf.pci_address);
        write(&dir.join("vendor"), "0x8086")?;
        write(&dir.join("device"), "0x4940")?;
        write(&dir.join("qat/state"), &pf.state)?;
        write(&dir.join("qat/cfg_services"), &pf.services)?;
        write(&dir.join("sriov_numvfs"), &pf.num_vfs.to_string())?;
        write(&dir.join("sriov_totalvfs"), &pf.total_vfs.to_string())?;

        for n in 1..=pf.num_vfs {
            let vf = vf_address(&pf.pci_address, n);
            let vf_dir = devices_dir.join(&vf);
            write(&vf_dir.join("vendor"), "0x8086")?;
            write(&vf_dir.join("device"), "0x4941")?;
            link("../../../bus/pci/drivers/vfio-pci", &vf_dir.join("driver"))?;
            link(
                &format!("../../../kernel/iommu_groups/{iommu_group}"),
                &vf_dir.join("iommu_group"),
            )?;
            link(&format!("../{vf}"), &dir.join(format!("virtfn{}", n - 1)))?;
            iommu_group += 1;
        }
    }
    Ok(())
}
