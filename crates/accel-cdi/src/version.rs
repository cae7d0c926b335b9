//! Minimum CDI spec version required by a document's contents.

use semver::Version;

use crate::spec::Spec;

const BASE: Version = Version::new(0, 3, 0);
const V040: Version = Version::new(0, 4, 0);
const V050: Version = Version::new(0, 5, 0);
const V060: Version = Version::new(0, 6, 0);

/// Mount `type` fields arrived in 0.4.0.
fn requires_v040(spec: &Spec) -> bool {
    edits(spec).any(|e| e.mounts.iter().any(|m| m.mount_type.is_some()))
}

/// Device-node host paths and device names starting with a digit arrived
/// in 0.5.0.
fn requires_v050(spec: &Spec) -> bool {
    let digit_name = spec
        .devices
        .iter()
        .any(|d| d.name.starts_with(|c: char| c.is_ascii_digit()));
    digit_name || edits(spec).any(|e| e.device_nodes.iter().any(|n| n.host_path.is_some()))
}

/// Annotations arrived in 0.6.0.
fn requires_v060(spec: &Spec) -> bool {
    !spec.annotations.is_empty() || spec.devices.iter().any(|d| !d.annotations.is_empty())
}

fn edits(spec: &Spec) -> impl Iterator<Item = &crate::spec::ContainerEdits> {
    std::iter::once(&spec.container_edits).chain(spec.devices.iter().map(|d| &d.container_edits))
}

pub fn minimum_required_version(spec: &Spec) -> Version {
    if requires_v060(spec) {
        V060
    } else if requires_v050(spec) {
        V050
    } else if requires_v040(spec) {
        V040
    } else {
        BASE
    }
}
