//! Telemetry sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use accel_core::{TelemetryDetails, TelemetrySnapshot};
use serde::Deserialize;

use crate::error::{HealthError, HealthResult};
use crate::status::HealthCategory;

/// Raw status codes per device PCI address and category.
pub type HealthReadings = BTreeMap<String, BTreeMap<HealthCategory, u32>>;

/// Vendor telemetry, seen as a data source.
pub trait TelemetrySource: Send + Sync {
    /// Per-device details keyed by PCI address.
    fn discover(&self) -> HealthResult<TelemetrySnapshot>;

    /// Current raw status codes for `devices`.
    fn health(&self, devices: &TelemetrySnapshot) -> HealthResult<HealthReadings>;
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    #[serde(flatten)]
    details: TelemetryDetails,
    #[serde(default)]
    health: BTreeMap<HealthCategory, u32>,
}

/// Reads a JSON snapshot file written by an external exporter:
///
/// ```json
/// {"devices": [{"pci_address": "0000:03:00.0", "model_name": "Flex 170",
///               "memory_mib": 16384, "health": {"core-thermal": 1, "memory": 3}}]}
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HealthResult<SnapshotFile> {
        let data = std::fs::read(&self.path).map_err(|source| HealthError::TelemetryRead {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| HealthError::TelemetryParse {
            path: self.path.clone(),
            source,
        })
    }
}

impl TelemetrySource for JsonFileSource {
    fn discover(&self) -> HealthResult<TelemetrySnapshot> {
        Ok(self
            .load()?
            .devices
            .into_iter()
            .map(|entry| (entry.details.pci_address.clone(), entry.details))
            .collect())
    }

    fn health(&self, devices: &TelemetrySnapshot) -> HealthResult<HealthReadings> {
        Ok(self
            .load()?
            .devices
            .into_iter()
            .filter(|entry| devices.contains_key(&entry.details.pci_address))
            .map(|entry| (entry.details.pci_address, entry.health))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        std::fs::write(
            &path,
            r#"{"devices": [
                {"pci_address": "0000:03:00.0", "model_name": "Flex 170", "memory_mib": 16384,
                 "health": {"core-thermal": 1, "memory": 3}},
                {"pci_address": "0000:04:00.0", "model_name": "Flex 170", "memory_mib": 16384}
            ]}"#,
        )
        .unwrap();

        let source = JsonFileSource::new(&path);
        let snapshot = source.discover().unwrap();
        assert_eq!(snapshot["0000:03:00.0"].memory_mib, 16384);
        assert_eq!(snapshot.len(), 2);

        let first: TelemetrySnapshot = snapshot
            .into_iter()
            .filter(|(pci, _)| pci == "0000:03:00.0")
            .collect();
        let readings = source.health(&first).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings["0000:03:00.0"][&HealthCategory::Memory], 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let source = JsonFileSource::new("/nonexistent/telemetry.json");
        assert!(matches!(
            source.discover(),
            Err(HealthError::TelemetryRead { .. })
        ));
    }
}
