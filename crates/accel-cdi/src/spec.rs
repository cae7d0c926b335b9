//! CDI spec document model (JSON form).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub cdi_version: String,
    pub kind: String,
    #[serde(default)]
    pub devices: Vec<CdiDevice>,
    #[serde(default, skip_serializing_if = "ContainerEdits::is_empty")]
    pub container_edits: ContainerEdits,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Spec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn device(&self, name: &str) -> Option<&CdiDevice> {
        self.devices.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiDevice {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub container_edits: ContainerEdits,
}

impl CdiDevice {
    pub fn new(name: impl Into<String>, container_edits: ContainerEdits) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
            container_edits,
        }
    }

    /// Claim-scoped entries carry no device nodes.
    pub fn is_claim_scoped(&self) -> bool {
        self.container_edits.device_nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEdits {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_nodes: Vec<DeviceNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
}

impl ContainerEdits {
    pub fn is_empty(&self) -> bool {
        self.env.is_empty()
            && self.device_nodes.is_empty()
            && self.hooks.is_empty()
            && self.mounts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNode {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
}

impl DeviceNode {
    /// Character device at `path`, optionally backed by a different host path.
    pub fn char_device(path: impl Into<String>, host_path: Option<String>) -> Self {
        Self {
            path: path.into(),
            host_path,
            node_type: Some("c".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub hook_name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names_follow_cdi() {
        let mut spec = Spec::new("intel.com/qat");
        spec.cdi_version = "0.3.0".to_string();
        spec.devices.push(CdiDevice::new(
            "qatvf-0000-4b-00-1",
            ContainerEdits {
                device_nodes: vec![DeviceNode::char_device("/dev/vfio/7", None)],
                ..Default::default()
            },
        ));
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"cdiVersion\":\"0.3.0\""));
        assert!(json.contains("\"containerEdits\""));
        assert!(json.contains("\"deviceNodes\""));
        assert!(json.contains("\"type\":\"c\""));
        assert!(!json.contains("hostPath"));
        assert!(!json.contains("annotations"));
    }

    #[test]
    fn claim_scoped_has_no_nodes() {
        let dev = CdiDevice::new(
            "claim-uid",
            ContainerEdits {
                env: vec!["A=1".to_string()],
                ..Default::default()
            },
        );
        assert!(dev.is_claim_scoped());
    }
}
