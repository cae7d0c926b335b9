//! accel-discovery — turns a sysfs tree into canonical device records.
//!
//! Every scanner is a pure read of the hardware description root. A
//! malformed device is logged and skipped; a missing driver directory just
//! yields an empty inventory.

pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fakesysfs;
pub mod gaudi;
pub mod gpu;
pub mod qat;
pub mod sriov;
mod sysfs;

use std::collections::BTreeMap;
use std::path::Path;

use accel_core::{Device, Family, NamingStyle, TelemetrySnapshot};

pub use error::{DiscoveryError, DiscoveryResult};
pub use qat::{PfInfo, PfState, VfDriver, VfInfo};

/// Result of scanning one family.
#[derive(Debug, Clone, PartialEq)]
pub enum Inventory {
    /// Device name → record, for single-function families.
    Devices(BTreeMap<String, Device>),
    /// Physical functions with their virtual functions.
    Qat(Vec<PfInfo>),
}

impl Inventory {
    pub fn len(&self) -> usize {
        match self {
            Inventory::Devices(devices) => devices.len(),
            Inventory::Qat(pfs) => pfs.iter().map(|pf| pf.vfs.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scan `sysfs_root` for devices of `family`.
pub fn discover(
    family: Family,
    sysfs_root: &Path,
    naming: NamingStyle,
    telemetry: &TelemetrySnapshot,
) -> Inventory {
    match family {
        Family::Gaudi => Inventory::Devices(gaudi::discover_devices(sysfs_root, naming)),
        Family::Gpu => Inventory::Devices(gpu::discover_devices(sysfs_root, naming, telemetry)),
        Family::Qat => Inventory::Qat(qat::discover_pfs(sysfs_root)),
    }
}
