//! Health categories, statuses and what they mean for scheduling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HealthError, HealthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthCategory {
    CoreThermal,
    MemoryThermal,
    Power,
    Memory,
    FabricPort,
    Frequency,
}

impl HealthCategory {
    pub const ALL: [HealthCategory; 6] = [
        HealthCategory::CoreThermal,
        HealthCategory::MemoryThermal,
        HealthCategory::Power,
        HealthCategory::Memory,
        HealthCategory::FabricPort,
        HealthCategory::Frequency,
    ];

    /// Key used in a device's health-status map.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCategory::CoreThermal => "CoreThermal",
            HealthCategory::MemoryThermal => "MemoryThermal",
            HealthCategory::Power => "Power",
            HealthCategory::Memory => "Memory",
            HealthCategory::FabricPort => "FabricPort",
            HealthCategory::Frequency => "Frequency",
        }
    }

    /// Lowercase form for marker names and keys.
    pub fn slug(&self) -> &'static str {
        match self {
            HealthCategory::CoreThermal => "core-thermal",
            HealthCategory::MemoryThermal => "memory-thermal",
            HealthCategory::Power => "power",
            HealthCategory::Memory => "memory",
            HealthCategory::FabricPort => "fabric-port",
            HealthCategory::Frequency => "frequency",
        }
    }
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthCategory {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HealthCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s || c.slug() == s)
            .ok_or_else(|| HealthError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Unknown,
    Ok,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Map a raw telemetry code. Anything outside 0..=3 means the source
    /// and the agent disagree on the protocol.
    pub fn from_code(device: &str, category: HealthCategory, code: u32) -> HealthResult<Self> {
        match code {
            0 => Ok(HealthStatus::Unknown),
            1 => Ok(HealthStatus::Ok),
            2 => Ok(HealthStatus::Warning),
            3 => Ok(HealthStatus::Critical),
            _ => Err(HealthError::InvalidStatus {
                device: device.to_string(),
                category: category.to_string(),
                code,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "Unknown",
            HealthStatus::Ok => "OK",
            HealthStatus::Warning => "Warning",
            HealthStatus::Critical => "Critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            HealthStatus::Unknown,
            HealthStatus::Ok,
            HealthStatus::Warning,
            HealthStatus::Critical,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub healthy: bool,
    pub taint: Option<TaintEffect>,
}

pub fn classify(status: HealthStatus, ignore_warning: bool) -> Classification {
    match status {
        HealthStatus::Critical => Classification {
            healthy: false,
            taint: Some(TaintEffect::NoExecute),
        },
        HealthStatus::Warning if !ignore_warning => Classification {
            healthy: false,
            taint: Some(TaintEffect::NoSchedule),
        },
        HealthStatus::Warning | HealthStatus::Ok | HealthStatus::Unknown => Classification {
            healthy: true,
            taint: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        let cat = HealthCategory::Power;
        assert_eq!(HealthStatus::from_code("d", cat, 0).unwrap(), HealthStatus::Unknown);
        assert_eq!(HealthStatus::from_code("d", cat, 3).unwrap(), HealthStatus::Critical);
        let err = HealthStatus::from_code("d", cat, 7).unwrap_err();
        assert_eq!(err.to_string(), "device d: invalid Power health status 7");
    }

    #[test]
    fn warning_policy() {
        assert_eq!(
            classify(HealthStatus::Warning, false),
            Classification {
                healthy: false,
                taint: Some(TaintEffect::NoSchedule)
            }
        );
        assert!(classify(HealthStatus::Warning, true).healthy);
        assert_eq!(
            classify(HealthStatus::Critical, true).taint,
            Some(TaintEffect::NoExecute)
        );
        assert!(classify(HealthStatus::Unknown, false).taint.is_none());
    }

    #[test]
    fn category_names() {
        assert_eq!("fabric-port".parse::<HealthCategory>().unwrap(), HealthCategory::FabricPort);
        assert_eq!("MemoryThermal".parse::<HealthCategory>().unwrap(), HealthCategory::MemoryThermal);
        assert!("fan".parse::<HealthCategory>().is_err());
        assert_eq!(HealthStatus::parse("OK"), Some(HealthStatus::Ok));
    }
}
