//! Registry entries generated from allocation tables.

use std::collections::BTreeMap;
use std::path::Path;

use accel_alloc::{AllocationTable, VirtualFunction};
use accel_core::{DeviceDetails, GaudiDetails, GpuDetails};

use crate::spec::{ContainerEdits, DeviceNode, Hook, Mount};

pub const VISIBLE_DEVICES_ENV: &str = "HABANA_VISIBLE_DEVICES";
pub const VISIBLE_MODULES_ENV: &str = "HABANA_VISIBLE_MODULES";
pub const HL_VISIBLE_DEVICES_ENV: &str = "HL_VISIBLE_DEVICES";

const HOOK_BASE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// `/dev/<rel>` inside the container, backed by `<devfs_root>/dev/<rel>`.
fn node(devfs_root: &Path, rel: &str) -> DeviceNode {
    let path = format!("/dev/{rel}");
    let host = devfs_root.join("dev").join(rel).display().to_string();
    let host_path = (host != path).then_some(host);
    DeviceNode::char_device(path, host_path)
}

pub fn gaudi_edits(details: &GaudiDetails, devfs_root: &Path) -> ContainerEdits {
    let mut device_nodes = vec![
        node(devfs_root, &format!("accel/accel{}", details.device_idx)),
        node(devfs_root, &format!("accel/accel_controlD{}", details.device_idx)),
    ];
    if details.has_uverbs() {
        device_nodes.push(node(
            devfs_root,
            &format!("infiniband/uverbs{}", details.uverbs_idx),
        ));
    }
    ContainerEdits {
        device_nodes,
        ..Default::default()
    }
}

pub fn gpu_edits(details: &GpuDetails, devfs_root: &Path) -> ContainerEdits {
    ContainerEdits {
        device_nodes: vec![
            node(devfs_root, &format!("dri/card{}", details.card_idx)),
            node(devfs_root, &format!("dri/renderD{}", details.renderd_idx)),
        ],
        ..Default::default()
    }
}

pub fn qat_vf_edits(vf: &VirtualFunction) -> ContainerEdits {
    ContainerEdits {
        device_nodes: vec![DeviceNode::char_device(vf.device_node(), None)],
        ..Default::default()
    }
}

/// Device name → container edits for everything in `table`.
pub fn registry_entries(table: &AllocationTable, devfs_root: &Path) -> BTreeMap<String, ContainerEdits> {
    match table {
        AllocationTable::Gaudi(t) | AllocationTable::Gpu(t) => t
            .devices()
            .iter()
            .map(|(name, device)| {
                let edits = match &device.details {
                    DeviceDetails::Gaudi(d) => gaudi_edits(d, devfs_root),
                    DeviceDetails::Gpu(d) => gpu_edits(d, devfs_root),
                };
                (name.clone(), edits)
            })
            .collect(),
        AllocationTable::Qat(t) => t
            .virtual_functions()
            .into_iter()
            .map(|(uid, vf)| (uid, qat_vf_edits(&vf)))
            .collect(),
    }
}

/// Claim-wide Habana runtime settings: visible devices and modules, the
/// container hook, and the gaudinet config when present on the host.
pub fn gaudi_claim_edits(devices: &[&GaudiDetails], hook_path: &Path, gaudinet_path: &Path) -> ContainerEdits {
    let join = |f: &dyn Fn(&GaudiDetails) -> String| {
        devices.iter().map(|d| f(d)).collect::<Vec<_>>().join(",")
    };
    let env = vec![
        format!("{VISIBLE_DEVICES_ENV}={}", join(&|d| d.device_idx.to_string())),
        format!("{VISIBLE_MODULES_ENV}={}", join(&|d| d.module_idx.to_string())),
        format!(
            "{HL_VISIBLE_DEVICES_ENV}={}",
            join(&|d| format!("/dev/accel/accel{}", d.device_idx))
        ),
    ];

    let hook_name = hook_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let hook_dir = hook_path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let hooks = vec![Hook {
        hook_name: "createRuntime".to_string(),
        path: hook_path.display().to_string(),
        args: vec![hook_name, "createRuntime".to_string()],
        env: vec![format!("PATH={HOOK_BASE_PATH}:{hook_dir}")],
    }];

    let mounts = if gaudinet_path.exists() {
        let path = gaudinet_path.display().to_string();
        vec![Mount {
            host_path: path.clone(),
            container_path: path,
            options: vec!["bind".to_string()],
            mount_type: None,
        }]
    } else {
        Vec::new()
    };

    ContainerEdits {
        env,
        device_nodes: Vec::new(),
        hooks,
        mounts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_core::{SriovRole, UVERBS_MISSING_IDX};
    use std::path::PathBuf;

    fn gaudi(idx: u64, uverbs: u64) -> GaudiDetails {
        GaudiDetails {
            device_idx: idx,
            module_idx: idx + 4,
            uverbs_idx: uverbs,
        }
    }

    #[test]
    fn gaudi_nodes_skip_missing_uverbs() {
        let edits = gaudi_edits(&gaudi(2, UVERBS_MISSING_IDX), Path::new("/"));
        let paths: Vec<&str> = edits.device_nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, ["/dev/accel/accel2", "/dev/accel/accel_controlD2"]);
        assert!(edits.device_nodes.iter().all(|n| n.host_path.is_none()));

        let edits = gaudi_edits(&gaudi(2, 5), Path::new("/"));
        assert_eq!(edits.device_nodes[2].path, "/dev/infiniband/uverbs5");
    }

    #[test]
    fn host_paths_follow_devfs_root() {
        let details = GpuDetails {
            driver: "i915".into(),
            card_idx: 1,
            renderd_idx: 129,
            memory_mib: 0,
            millicores: 1000,
            sriov: SriovRole::None,
        };
        let edits = gpu_edits(&details, Path::new("/host"));
        assert_eq!(edits.device_nodes[0].path, "/dev/dri/card1");
        assert_eq!(
            edits.device_nodes[1].host_path.as_deref(),
            Some("/host/dev/dri/renderD129")
        );
    }

    #[test]
    fn claim_edits_carry_env_and_hook() {
        let dir = tempfile::tempdir().unwrap();
        let gaudinet = dir.path().join("gaudinet.json");
        let hook = PathBuf::from("/usr/local/habana/bin/habana-container-hook");
        let (a, b) = (gaudi(0, 0), gaudi(3, 3));

        let edits = gaudi_claim_edits(&[&a, &b], &hook, &gaudinet);
        assert_eq!(
            edits.env,
            [
                "HABANA_VISIBLE_DEVICES=0,3",
                "HABANA_VISIBLE_MODULES=4,7",
                "HL_VISIBLE_DEVICES=/dev/accel/accel0,/dev/accel/accel3",
            ]
        );
        assert!(edits.device_nodes.is_empty());
        assert_eq!(edits.hooks[0].args, ["habana-container-hook", "createRuntime"]);
        assert_eq!(
            edits.hooks[0].env,
            ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:/usr/local/habana/bin"]
        );
        assert!(edits.mounts.is_empty());

        std::fs::write(&gaudinet, "{}").unwrap();
        let edits = gaudi_claim_edits(&[&a], &hook, &gaudinet);
        assert_eq!(edits.mounts.len(), 1);
        assert_eq!(edits.mounts[0].options, ["bind"]);
    }
}
