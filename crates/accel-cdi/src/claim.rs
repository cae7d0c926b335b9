//! Claim-scoped CDI entries.
//!
//! These live in the family's stable spec file next to the device entries
//! and are named after the claim UID. They carry no device nodes, which is
//! how [`crate::sync_devices`] tells them apart.

use accel_core::Family;
use tracing::debug;

use crate::error::CdiResult;
use crate::registry::Registry;
use crate::spec::{CdiDevice, ContainerEdits, Spec};

/// Create or replace the entry for `claim_uid`; returns its qualified name.
pub fn upsert_claim_entry(
    registry: &mut Registry,
    family: Family,
    claim_uid: &str,
    edits: ContainerEdits,
) -> CdiResult<String> {
    let name = Registry::spec_name(family);
    let mut spec = registry
        .spec(&name)
        .map(|file| file.spec.clone())
        .unwrap_or_else(|| Spec::new(family.cdi_kind()));

    match spec.devices.iter_mut().find(|d| d.name == claim_uid) {
        Some(existing) => existing.container_edits = edits,
        None => spec.devices.push(CdiDevice::new(claim_uid, edits)),
    }
    registry.write_spec(spec, &name)?;
    debug!(claim = %claim_uid, "claim CDI entry written");
    Ok(family.qualified_name(claim_uid))
}

/// Remove the entry for `claim_uid` from every spec of the family's kind.
/// Returns whether anything was removed.
pub fn delete_claim_entry(registry: &mut Registry, family: Family, claim_uid: &str) -> CdiResult<bool> {
    let kind = family.cdi_kind();
    let holders: Vec<(String, Spec)> = registry
        .specs_of_kind(&kind)
        .filter(|file| {
            file.spec
                .device(claim_uid)
                .is_some_and(CdiDevice::is_claim_scoped)
        })
        .map(|file| (file.name(), file.spec.clone()))
        .collect();

    let removed = !holders.is_empty();
    for (name, mut spec) in holders {
        spec.devices
            .retain(|d| !(d.name == claim_uid && d.is_claim_scoped()));
        registry.write_spec(spec, &name)?;
    }
    if removed {
        debug!(claim = %claim_uid, "claim CDI entry deleted");
    }
    Ok(removed)
}

/// Names of every claim-scoped entry of the family's kind.
pub fn claim_entry_names(registry: &Registry, family: Family) -> Vec<String> {
    let kind = family.cdi_kind();
    registry
        .specs_of_kind(&kind)
        .flat_map(|file| file.spec.devices.iter())
        .filter(|d| d.is_claim_scoped())
        .map(|d| d.name.clone())
        .collect()
}
