//! GPU discovery for the `i915` and `xe` kernel drivers.

use std::collections::BTreeMap;
use std::path::Path;

use accel_core::{
    pci, Device, DeviceDetails, GpuDetails, NamingStyle, TelemetrySnapshot,
};
use tracing::{debug, error, warn};

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::{sriov, sysfs};

pub const DRIVERS: [&str; 2] = ["i915", "xe"];
pub const INITIAL_MILLICORES: u64 = 1000;

pub fn model_name(model: &str) -> &'static str {
    match model {
        "0x56c0" => "Flex 170",
        "0x56c1" => "Flex 140",
        "0x0bd5" | "0x0bd6" => "Max 1550",
        "0x0bda" | "0x0bdb" => "Max 1100",
        "0x56a0" => "Arc A770",
        "0xe20b" => "Arc B580",
        _ => "Unknown",
    }
}

pub fn discover_devices(
    sysfs_root: &Path,
    naming: NamingStyle,
    telemetry: &TelemetrySnapshot,
) -> BTreeMap<String, Device> {
    let mut devices = BTreeMap::new();
    let pci_re = match pci::address_regex() {
        Ok(re) => re,
        Err(e) => {
            error!(error = %e, "invalid PCI address pattern");
            return devices;
        }
    };

    for driver in DRIVERS {
        let driver_dir = sysfs_root.join("bus/pci/drivers").join(driver);
        let entries = match sysfs::entry_names(&driver_dir) {
            Ok(entries) => entries,
            Err(_) => {
                debug!(?driver_dir, "driver directory not present");
                continue;
            }
        };

        for name in entries.iter().filter(|n| pci_re.is_match(n)) {
            match probe_device(&driver_dir, driver, name, telemetry) {
                Ok(device) => {
                    let key = match (&device.details, naming) {
                        (DeviceDetails::Gpu(d), NamingStyle::Classic) => {
                            format!("card{}", d.card_idx)
                        }
                        _ => device.uid.clone(),
                    };
                    debug!(uid = %device.uid, %key, driver, "found GPU");
                    devices.insert(key, device);
                }
                Err(e) => warn!(pci_address = %name, error = %e, "skipping GPU"),
            }
        }
    }

    devices
}

fn probe_device(
    driver_dir: &Path,
    driver: &str,
    pci_address: &str,
    telemetry: &TelemetrySnapshot,
) -> DiscoveryResult<Device> {
    let device_dir = driver_dir.join(pci_address);
    let model = sysfs::read_trimmed(&device_dir.join("device"))?;
    let (card_idx, renderd_idx) = drm_indices(&device_dir.join("drm"))?;

    let details = telemetry.get(pci_address);
    if details.is_none() && !telemetry.is_empty() {
        warn!(%pci_address, "no telemetry details, local memory unknown");
    }
    let name = details
        .map(|d| d.model_name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| model_name(&model).to_string());

    Ok(Device {
        uid: pci::device_uid(pci_address, &model),
        pci_address: pci_address.to_string(),
        model_name: name,
        pci_root: pci::pci_root(&device_dir).unwrap_or_default(),
        healthy: true,
        health_status: BTreeMap::new(),
        details: DeviceDetails::Gpu(GpuDetails {
            driver: driver.to_string(),
            card_idx,
            renderd_idx,
            memory_mib: details.map(|d| d.memory_mib).unwrap_or(0),
            millicores: INITIAL_MILLICORES,
            sriov: sriov::detect(&device_dir, pci_address, &model),
        }),
        model,
    })
}

/// `(N, M)` from `drm/cardN` and `drm/renderDM`.
fn drm_indices(drm_dir: &Path) -> DiscoveryResult<(u64, u64)> {
    let names = sysfs::entry_names(drm_dir).map_err(|source| DiscoveryError::Read {
        path: drm_dir.to_path_buf(),
        source,
    })?;
    let card = names.iter().find_map(|n| sysfs::index_suffix(n, "card"));
    let render = names.iter().find_map(|n| sysfs::index_suffix(n, "renderD"));
    match card {
        Some(card) => Ok((card, render.unwrap_or(0))),
        None => Err(DiscoveryError::Layout(format!(
            "no cardN entry in {}",
            drm_dir.display()
        ))),
    }
}
