//! Scheduling-blocking markers for unhealthy devices.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HealthError, HealthResult};
use crate::status::{HealthCategory, TaintEffect};

/// A taint associated with one device category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub key: String,
    pub effect: TaintEffect,
    pub device_uid: String,
}

impl Marker {
    pub fn new(driver: &str, node: &str, device_uid: &str, category: HealthCategory, effect: TaintEffect) -> Self {
        Self {
            name: Self::name_for(driver, node, device_uid, category),
            key: format!("{driver}/{}", category.slug()),
            effect,
            device_uid: device_uid.to_string(),
        }
    }

    pub fn name_for(driver: &str, node: &str, device_uid: &str, category: HealthCategory) -> String {
        format!("{driver}-{node}-{device_uid}-{}", category.slug())
    }
}

pub trait MarkerStore: Send + Sync {
    fn get(&self, name: &str) -> HealthResult<Option<Marker>>;
    fn create(&self, marker: &Marker) -> HealthResult<()>;
    fn delete(&self, name: &str) -> HealthResult<()>;

    /// Create `marker` unless an identical one exists. Returns true if written.
    fn ensure(&self, marker: &Marker) -> HealthResult<bool> {
        if self.get(&marker.name)?.as_ref() == Some(marker) {
            return Ok(false);
        }
        self.create(marker)?;
        Ok(true)
    }

    /// Delete `name` if present. Returns true if something was removed.
    fn remove(&self, name: &str) -> HealthResult<bool> {
        if self.get(name)?.is_none() {
            return Ok(false);
        }
        self.delete(name)?;
        Ok(true)
    }
}

/// One JSON file per marker under a directory.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    dir: PathBuf,
}

impl FileMarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

fn marker_err(name: &str) -> impl FnOnce(io::Error) -> HealthError + '_ {
    move |source| HealthError::Marker {
        name: name.to_string(),
        source,
    }
}

impl MarkerStore for FileMarkerStore {
    fn get(&self, name: &str) -> HealthResult<Option<Marker>> {
        match fs::read(self.path(name)) {
            Ok(data) => Ok(serde_json::from_slice(&data).ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(marker_err(name)(e)),
        }
    }

    fn create(&self, marker: &Marker) -> HealthResult<()> {
        fs::create_dir_all(&self.dir).map_err(marker_err(&marker.name))?;
        let data = serde_json::to_vec_pretty(marker)
            .map_err(io::Error::from)
            .map_err(marker_err(&marker.name))?;
        fs::write(self.path(&marker.name), data).map_err(marker_err(&marker.name))?;
        info!(marker = %marker.name, effect = ?marker.effect, "taint marker created");
        Ok(())
    }

    fn delete(&self, name: &str) -> HealthResult<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => {
                info!(marker = %name, "taint marker removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(marker = %name, "taint marker already gone");
                Ok(())
            }
            Err(e) => Err(marker_err(name)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming() {
        let marker = Marker::new(
            "gpu.intel.com",
            "node-a",
            "0000-03-00-0-0x56a0",
            HealthCategory::CoreThermal,
            TaintEffect::NoExecute,
        );
        assert_eq!(marker.name, "gpu.intel.com-node-a-0000-03-00-0-0x56a0-core-thermal");
        assert_eq!(marker.key, "gpu.intel.com/core-thermal");
    }

    #[test]
    fn ensure_and_remove_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMarkerStore::new(dir.path().join("markers"));
        let warn = Marker::new("gpu.intel.com", "n", "d", HealthCategory::Power, TaintEffect::NoSchedule);

        assert!(store.ensure(&warn).unwrap());
        assert!(!store.ensure(&warn).unwrap());

        let crit = Marker {
            effect: TaintEffect::NoExecute,
            ..warn.clone()
        };
        assert!(store.ensure(&crit).unwrap());
        assert_eq!(store.get(&warn.name).unwrap().unwrap().effect, TaintEffect::NoExecute);

        assert!(store.remove(&warn.name).unwrap());
        assert!(!store.remove(&warn.name).unwrap());
    }
}
