//! Canonical device model shared by every accelerator family.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Vendor half of every registry kind and driver name.
pub const CDI_VENDOR: &str = "intel.com";

// ── Family ─────────────────────────────────────────────────────

/// Accelerator family served by one agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Gaudi,
    Gpu,
    Qat,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Gaudi => "gaudi",
            Family::Gpu => "gpu",
            Family::Qat => "qat",
        }
    }

    /// Driver name used by the orchestrator, e.g. `gaudi.intel.com`.
    pub fn driver_name(&self) -> String {
        format!("{}.{CDI_VENDOR}", self.as_str())
    }

    pub fn cdi_class(&self) -> &'static str {
        self.as_str()
    }

    /// Registry kind, e.g. `intel.com/gaudi`.
    pub fn cdi_kind(&self) -> String {
        format!("{CDI_VENDOR}/{}", self.cdi_class())
    }

    /// Fully qualified registry device name, e.g. `intel.com/qat=qatvf-vfio`.
    pub fn qualified_name(&self, device: &str) -> String {
        format!("{}={device}", self.cdi_kind())
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaudi" => Ok(Family::Gaudi),
            "gpu" => Ok(Family::Gpu),
            "qat" => Ok(Family::Qat),
            other => Err(CoreError::UnknownFamily(other.to_string())),
        }
    }
}

// ── Naming ─────────────────────────────────────────────────────

/// How discovered devices are keyed in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    /// Stable UID derived from PCI address and model.
    #[default]
    Machine,
    /// Kernel-style names: `accel0`, `card1`.
    Classic,
}

impl FromStr for NamingStyle {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "machine" => Ok(NamingStyle::Machine),
            "classic" => Ok(NamingStyle::Classic),
            other => Err(CoreError::UnknownNamingStyle(other.to_string())),
        }
    }
}

// ── Device ─────────────────────────────────────────────────────

/// One allocatable single-function accelerator (Gaudi or GPU).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uid: String,
    pub pci_address: String,
    /// Hardware model id, e.g. `0x1020`.
    pub model: String,
    pub model_name: String,
    pub pci_root: String,
    pub healthy: bool,
    /// Health category → status name, as last reported by telemetry.
    #[serde(default)]
    pub health_status: BTreeMap<String, String>,
    pub details: DeviceDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DeviceDetails {
    Gaudi(GaudiDetails),
    Gpu(GpuDetails),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaudiDetails {
    /// `N` in `/dev/accel/accelN`.
    pub device_idx: u64,
    pub module_idx: u64,
    /// `M` in `/dev/infiniband/uverbsM`, or [`UVERBS_MISSING_IDX`].
    pub uverbs_idx: u64,
}

/// Out-of-range uverbs index meaning "no RDMA interface".
pub const UVERBS_MISSING_IDX: u64 = 1024;

impl GaudiDetails {
    pub fn has_uverbs(&self) -> bool {
        self.uverbs_idx != UVERBS_MISSING_IDX
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDetails {
    pub driver: String,
    pub card_idx: u64,
    pub renderd_idx: u64,
    pub memory_mib: u64,
    pub millicores: u64,
    pub sriov: SriovRole,
}

/// SR-IOV position of a PCI function.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SriovRole {
    #[default]
    None,
    /// Function that can spawn up to `max_vfs` children.
    Parent { max_vfs: u64 },
    /// Virtual function at `vf_index` under `parent_uid`.
    Child { parent_uid: String, vf_index: u64 },
}

impl Device {
    pub fn family(&self) -> Family {
        match self.details {
            DeviceDetails::Gaudi(_) => Family::Gaudi,
            DeviceDetails::Gpu(_) => Family::Gpu,
        }
    }
}

// ── Telemetry snapshot ─────────────────────────────────────────

/// Per-device facts reported by the telemetry collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryDetails {
    pub pci_address: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub memory_mib: u64,
}

/// Telemetry details keyed by PCI address.
pub type TelemetrySnapshot = BTreeMap<String, TelemetryDetails>;
