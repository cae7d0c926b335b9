//! Where the node's device pool is advertised.

use std::sync::Mutex;

use accel_core::DriverResources;

/// Receives the full device pool each time it changes. Publishing the same
/// inventory twice must be harmless.
pub trait InventoryPublisher: Send + Sync {
    fn publish(&self, resources: &DriverResources) -> anyhow::Result<()>;
}

/// Keeps every published inventory in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<DriverResources>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<DriverResources> {
        self.published
            .lock()
            .ok()
            .and_then(|published| published.last().cloned())
    }

    pub fn count(&self) -> usize {
        self.published.lock().map(|p| p.len()).unwrap_or_default()
    }
}

impl InventoryPublisher for MemoryPublisher {
    fn publish(&self, resources: &DriverResources) -> anyhow::Result<()> {
        self.published
            .lock()
            .map_err(|_| anyhow::anyhow!("publisher lock poisoned"))?
            .push(resources.clone());
        Ok(())
    }
}
