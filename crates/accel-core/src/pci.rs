//! PCI address helpers and deterministic device naming.

use std::fs;
use std::path::{Component, Path};

use regex::Regex;

/// Matches a full PCI function address such as `0000:0f:00.0`.
pub const PCI_ADDRESS_PATTERN: &str = r"^[0-9a-f]{4}:[0-9a-f]{2}:[0-9a-f]{2}\.[0-7]$";

pub fn address_regex() -> Result<Regex, regex::Error> {
    Regex::new(PCI_ADDRESS_PATTERN)
}

fn flatten(pci_address: &str) -> String {
    pci_address.replace([':', '.'], "-")
}

/// Stable device UID: `0000:0f:00.0` + `0x1020` → `0000-0f-00-0-0x1020`.
pub fn device_uid(pci_address: &str, model: &str) -> String {
    format!("{}-{}", flatten(pci_address), model)
}

/// QAT virtual function UID: `0000:4b:00.1` → `qatvf-0000-4b-00-1`.
pub fn qat_vf_uid(pci_address: &str) -> String {
    format!("qatvf-{}", flatten(pci_address))
}

/// Extract the PCI root bus number from a sysfs device path.
///
/// The device link resolves into `/sys/devices/pci0000:XX/...`; the root is
/// the `XX` part. Returns `None` when the path does not cross a PCI root.
pub fn pci_root(device_path: &Path) -> Option<String> {
    let target = fs::read_link(device_path).ok()?;
    target.components().find_map(|c| match c {
        Component::Normal(name) => {
            let name = name.to_str()?;
            name.strip_prefix("pci")
                .and_then(|rest| rest.split_once(':'))
                .map(|(_, bus)| bus.to_string())
        }
        _ => None,
    })
}

/// Last path component of a symlink target, e.g. `../0000:00:02.1` → `0000:00:02.1`.
pub fn link_basename(link: &Path) -> Option<String> {
    let target = fs::read_link(link).ok()?;
    target
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}
