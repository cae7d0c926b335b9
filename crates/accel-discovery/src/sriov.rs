//! SR-IOV parent/child detection shared by the GPU and QAT scanners.

use std::fs;
use std::path::Path;

use accel_core::{pci, SriovRole};
use tracing::{debug, warn};

use crate::sysfs;

/// `virtfnN` links under a parent function: `(N, target PCI address)`,
/// ordered by `N`. Links whose target is not a PCI address are skipped.
pub fn virtfn_links(parent_dir: &Path) -> Vec<(u64, String)> {
    let Ok(names) = sysfs::entry_names(parent_dir) else {
        return Vec::new();
    };
    let Ok(pci_re) = pci::address_regex() else {
        return Vec::new();
    };

    let mut links: Vec<(u64, String)> = names
        .iter()
        .filter_map(|name| {
            let idx = sysfs::index_suffix(name, "virtfn")?;
            let target = pci::link_basename(&parent_dir.join(name))?;
            if !pci_re.is_match(&target) {
                warn!(link = %name, %target, "unexpected virtfn target, skipping");
                return None;
            }
            Some((idx, target))
        })
        .collect();
    links.sort_by_key(|(idx, _)| *idx);
    links
}

/// Classify the function at `device_dir`.
///
/// A function exposing `sriov_totalvfs` is a parent whose capacity counts
/// only when driver autoprobe is enabled. A function with a `physfn` link
/// is a child; its index is the first parent `virtfnN` link resolving to
/// `pci_address`.
pub fn detect(device_dir: &Path, pci_address: &str, model: &str) -> SriovRole {
    let totalvfs_path = device_dir.join("sriov_totalvfs");
    if totalvfs_path.exists() {
        let max_vfs = match sysfs::read_u64(&totalvfs_path) {
            Ok(n) => n,
            Err(e) => {
                warn!(%pci_address, error = %e, "ignoring SR-IOV capacity");
                return SriovRole::None;
            }
        };
        return match sysfs::read_trimmed(&device_dir.join("sriov_drivers_autoprobe")) {
            Ok(flag) if flag != "0" => SriovRole::Parent { max_vfs },
            _ => {
                debug!(%pci_address, "sriov_drivers_autoprobe disabled, not enabling SR-IOV");
                SriovRole::None
            }
        };
    }

    let physfn = device_dir.join("physfn");
    if fs::symlink_metadata(&physfn).is_err() {
        return SriovRole::None;
    }
    let Some(parent_address) = pci::link_basename(&physfn) else {
        warn!(%pci_address, "unreadable physfn link, ignoring SR-IOV");
        return SriovRole::None;
    };

    match virtfn_links(&physfn)
        .into_iter()
        .find(|(_, target)| target == pci_address)
    {
        Some((vf_index, _)) => SriovRole::Child {
            parent_uid: pci::device_uid(&parent_address, model),
            vf_index,
        },
        None => {
            warn!(%pci_address, parent = %parent_address, "parent has no virtfn link to this function");
            SriovRole::None
        }
    }
}
