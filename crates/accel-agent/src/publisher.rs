//! Inventory publisher writing the device pool to a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use accel_core::DriverResources;
use accel_node::InventoryPublisher;
use anyhow::Context;
use tracing::debug;

pub const RESOURCES_FILE_NAME: &str = "resources.json";

/// Writes `<dir>/resources.json`, replacing it atomically.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    path: PathBuf,
}

impl FilePublisher {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(RESOURCES_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InventoryPublisher for FilePublisher {
    fn publish(&self, resources: &DriverResources) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(resources)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming to {}", self.path.display()))?;
        debug!(path = ?self.path, devices = resources.devices.len(), "inventory written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_core::PublishedDevice;

    #[test]
    fn publishes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FilePublisher::new(&dir.path().join("plugin"));
        let resources = DriverResources {
            driver: "qat.intel.com".to_string(),
            pool: "node-a".to_string(),
            devices: vec![PublishedDevice::new("qatvf-0000-4b-00-1").with_attribute("services", "sym")],
        };
        publisher.publish(&resources).unwrap();
        publisher.publish(&resources).unwrap();

        let back: DriverResources =
            serde_json::from_slice(&fs::read(publisher.path()).unwrap()).unwrap();
        assert_eq!(back, resources);
        assert!(!publisher.path().with_extension("json.tmp").exists());
    }
}
