//! Gaudi discovery: `<sysfs>/bus/pci/drivers/habanalabs/<pci>`.

use std::collections::BTreeMap;
use std::path::Path;

use accel_core::{
    pci, Device, DeviceDetails, GaudiDetails, NamingStyle, UVERBS_MISSING_IDX,
};
use tracing::{debug, error, warn};

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::sysfs;

pub const SYSFS_DRIVER_PATH: &str = "bus/pci/drivers/habanalabs";
pub const INFINIBAND_VERBS_DIR: &str = "infiniband_verbs";

/// Human-readable model name for a Gaudi PCI device id.
pub fn model_name(model: &str) -> &'static str {
    match model {
        "0x1000" | "0x1001" | "0x1010" | "0x1011" => "Gaudi",
        "0x1020" => "Gaudi2",
        "0x1030" | "0x1060" | "0x1061" | "0x1062" => "Gaudi3",
        _ => "Unknown",
    }
}

pub fn discover_devices(sysfs_root: &Path, naming: NamingStyle) -> BTreeMap<String, Device> {
    let driver_dir = sysfs_root.join(SYSFS_DRIVER_PATH);
    let mut devices = BTreeMap::new();

    let entries = match sysfs::entry_names(&driver_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?driver_dir, "no Gaudi driver directory, no devices");
            return devices;
        }
        Err(e) => {
            error!(?driver_dir, error = %e, "cannot read Gaudi driver directory");
            return devices;
        }
    };
    let pci_re = match pci::address_regex() {
        Ok(re) => re,
        Err(e) => {
            error!(error = %e, "invalid PCI address pattern");
            return devices;
        }
    };

    for name in entries.iter().filter(|n| pci_re.is_match(n)) {
        match probe_device(&driver_dir, name) {
            Ok(device) => {
                let key = match (&device.details, naming) {
                    (DeviceDetails::Gaudi(d), NamingStyle::Classic) => {
                        format!("accel{}", d.device_idx)
                    }
                    _ => device.uid.clone(),
                };
                debug!(uid = %device.uid, %key, "found Gaudi device");
                devices.insert(key, device);
            }
            Err(e) => warn!(pci_address = %name, error = %e, "skipping Gaudi device"),
        }
    }

    devices
}

fn probe_device(driver_dir: &Path, pci_address: &str) -> DiscoveryResult<Device> {
    let device_dir = driver_dir.join(pci_address);
    let model = sysfs::read_trimmed(&device_dir.join("device"))?;
    let device_idx = single_index(&device_dir.join("accel"), "accel")?;
    let module_idx = sysfs::read_u64(&device_dir.join("module_id"))?;
    let uverbs_idx = uverbs_index(&device_dir.join(INFINIBAND_VERBS_DIR));

    Ok(Device {
        uid: pci::device_uid(pci_address, &model),
        pci_address: pci_address.to_string(),
        model_name: model_name(&model).to_string(),
        model,
        pci_root: pci::pci_root(&device_dir).unwrap_or_default(),
        healthy: true,
        health_status: BTreeMap::new(),
        details: DeviceDetails::Gaudi(GaudiDetails {
            device_idx,
            module_idx,
            uverbs_idx,
        }),
    })
}

/// Index of the only `<prefix>N` entry in `dir`.
fn single_index(dir: &Path, prefix: &str) -> DiscoveryResult<u64> {
    let names = sysfs::entry_names(dir).map_err(|source| DiscoveryError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    let indices: Vec<u64> = names
        .iter()
        .filter_map(|n| sysfs::index_suffix(n, prefix))
        .collect();
    match indices.as_slice() {
        [idx] => Ok(*idx),
        _ => Err(DiscoveryError::Layout(format!(
            "expected exactly one {prefix}N entry in {}, found {}",
            dir.display(),
            indices.len()
        ))),
    }
}

fn uverbs_index(dir: &Path) -> u64 {
    let Ok(names) = sysfs::entry_names(dir) else {
        return UVERBS_MISSING_IDX;
    };
    names
        .iter()
        .find_map(|n| sysfs::index_suffix(n, "uverbs"))
        .unwrap_or(UVERBS_MISSING_IDX)
}
