//! Claims received from the orchestrator and their prepared results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::services::Services;

/// A resource claim allocated to this node by the external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub uid: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub results: Vec<DeviceAllocation>,
}

/// One device picked by the scheduler for a claim request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAllocation {
    pub request: String,
    pub driver: String,
    pub pool: String,
    pub device: String,
    /// QAT service requirement; absent means any profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Services>,
}

impl DeviceAllocation {
    pub fn requested_services(&self) -> Services {
        self.services.unwrap_or(Services::UNSET)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedDevice {
    pub requests: Vec<String>,
    pub pool_name: String,
    pub device_name: String,
    #[serde(rename = "cdiDeviceIDs")]
    pub cdi_device_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreparedResult {
    pub devices: Vec<PreparedDevice>,
}

/// Claim UID → prepared result.
pub type PreparedClaims = BTreeMap<String, PreparedResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_wire_format() {
        let json = r#"{
            "uid": "c1",
            "results": [
                {"request": "qat", "driver": "qat.intel.com", "pool": "node1",
                 "device": "qatvf-0000-4b-00-1", "services": "sym"}
            ]
        }"#;
        let claim: Claim = serde_json::from_str(json).unwrap();
        assert_eq!(claim.uid, "c1");
        assert_eq!(claim.results[0].requested_services(), Services::SYM);
    }

    #[test]
    fn missing_services_is_unset() {
        let alloc = DeviceAllocation {
            request: "r".into(),
            driver: "gaudi.intel.com".into(),
            pool: "n".into(),
            device: "d".into(),
            services: None,
        };
        assert!(alloc.requested_services().is_unset());
    }

    #[test]
    fn prepared_device_field_names() {
        let dev = PreparedDevice {
            requests: vec!["r".into()],
            pool_name: "node1".into(),
            device_name: "d".into(),
            cdi_device_ids: vec!["intel.com/gpu=d".into()],
        };
        let json = serde_json::to_string(&dev).unwrap();
        assert!(json.contains("\"poolName\""));
        assert!(json.contains("\"cdiDeviceIDs\""));
    }
}
