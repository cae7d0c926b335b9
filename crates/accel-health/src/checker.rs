//! Per-device status cache producing deltas between polls.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::HealthError;
use crate::status::{HealthCategory, HealthStatus};
use crate::telemetry::HealthReadings;

/// Changed categories per device, keyed like the readings.
pub type HealthDeltas = BTreeMap<String, BTreeMap<HealthCategory, HealthStatus>>;

#[derive(Debug, Default)]
pub struct HealthCache {
    previous: BTreeMap<String, BTreeMap<HealthCategory, HealthStatus>>,
}

impl HealthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known status, if the device has been seen.
    pub fn status(&self, device: &str, category: HealthCategory) -> Option<HealthStatus> {
        self.previous.get(device)?.get(&category).copied()
    }

    /// Compare `readings` against the cache without recording them.
    ///
    /// Devices not seen before are compared against OK in every category.
    /// Invalid codes are returned as errors and leave that category out of
    /// the delta.
    pub fn diff(&self, readings: &HealthReadings) -> (HealthDeltas, Vec<HealthError>) {
        let mut deltas = HealthDeltas::new();
        let mut errors = Vec::new();

        for (device, categories) in readings {
            let cached = self.previous.get(device);
            for (&category, &code) in categories {
                let status = match HealthStatus::from_code(device, category, code) {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(%device, %category, code, "rejecting health status");
                        errors.push(e);
                        continue;
                    }
                };
                let known = cached
                    .and_then(|c| c.get(&category).copied())
                    .unwrap_or(HealthStatus::Ok);
                if known != status {
                    deltas.entry(device.clone()).or_default().insert(category, status);
                }
            }
        }
        (deltas, errors)
    }

    /// Record `changes` for `device` once they have been acted on.
    pub fn commit(&mut self, device: &str, changes: &BTreeMap<HealthCategory, HealthStatus>) {
        let cached = self
            .previous
            .entry(device.to_string())
            .or_insert_with(all_ok);
        cached.extend(changes.iter().map(|(&c, &s)| (c, s)));
    }

    /// [`diff`](Self::diff) and commit everything in one step.
    #[cfg(test)]
    pub fn update(&mut self, readings: &HealthReadings) -> (HealthDeltas, Vec<HealthError>) {
        let (deltas, errors) = self.diff(readings);
        for device in readings.keys() {
            self.previous.entry(device.clone()).or_insert_with(all_ok);
        }
        for (device, changes) in &deltas {
            self.commit(device, changes);
        }
        (deltas, errors)
    }
}

fn all_ok() -> BTreeMap<HealthCategory, HealthStatus> {
    HealthCategory::ALL
        .into_iter()
        .map(|c| (c, HealthStatus::Ok))
        .collect()
}
