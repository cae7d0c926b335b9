//! HTTP surface tests against a fake QAT host.

use std::sync::Arc;

use accel_agent::{build_router, ApiState, FilePublisher};
use accel_cdi::Registry;
use accel_core::{Family, NamingStyle, TelemetrySnapshot};
use accel_discovery::fakesysfs::{self, FakeQatPf};
use accel_ledger::Ledger;
use accel_node::{NodeSettings, NodeState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct Host {
    dir: TempDir,
}

impl Host {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fakesysfs::write_qat(
            &dir.path().join("sys"),
            &[FakeQatPf {
                pci_address: "0000:4b:00.0".to_string(),
                state: "up".to_string(),
                services: "sym;asym".to_string(),
                num_vfs: 2,
                total_vfs: 2,
            }],
        )
        .unwrap();
        Self { dir }
    }

    async fn router(&self) -> Router {
        let sysfs_root = self.dir.path().join("sys");
        let settings = NodeSettings {
            node_name: "node-a".to_string(),
            family: Family::Qat,
            devfs_root: "/".into(),
            allow_reconfiguration: false,
            gaudi: Default::default(),
        };
        let inventory = accel_discovery::discover(
            Family::Qat,
            &sysfs_root,
            NamingStyle::Machine,
            &TelemetrySnapshot::new(),
        );
        let node = NodeState::start(
            settings,
            inventory,
            Registry::open(&self.dir.path().join("cdi")).unwrap(),
            Ledger::open_in_memory().unwrap(),
            Arc::new(FilePublisher::new(&self.dir.path().join("plugin"))),
        )
        .await
        .unwrap();
        build_router(ApiState {
            node,
            sysfs_root,
            naming: NamingStyle::Machine,
            telemetry: None,
        })
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn claim(uid: &str, device: &str) -> Value {
    json!({
        "uid": uid,
        "results": [{
            "request": "qat",
            "driver": "qat.intel.com",
            "pool": "node-a",
            "device": device
        }]
    })
}

#[tokio::test]
async fn prepare_and_unprepare_round() {
    let host = Host::new();
    let router = host.router().await;

    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/claims/prepare",
        Some(json!([claim("c1", "qatvf-0000-4b-00-1")])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let devices = &body["data"]["c1"]["devices"];
    assert_eq!(devices[0]["deviceName"], "qatvf-0000-4b-00-1");
    assert_eq!(devices[0]["cdiDeviceIDs"][1], "intel.com/qat=qatvf-vfio");

    let (_, body) = call(&router, "GET", "/api/v1/resources", None).await;
    assert_eq!(body["data"]["devices"].as_array().unwrap().len(), 2);

    let (status, body) = call(&router, "POST", "/api/v1/claims/unprepare", Some(json!(["c1"]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["c1"]["changed"], false);

    let published = std::fs::read(host.dir.path().join("plugin/resources.json")).unwrap();
    let published: Value = serde_json::from_slice(&published).unwrap();
    assert_eq!(published["driver"], "qat.intel.com");
}

#[tokio::test]
async fn per_claim_errors_are_reported() {
    let host = Host::new();
    let router = host.router().await;

    let (status, body) = call(
        &router,
        "POST",
        "/api/v1/claims/prepare",
        Some(json!([
            claim("a", "qatvf-0000-4b-00-2"),
            claim("b", "qatvf-0000-4b-00-2"),
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["a"]["devices"].is_array());
    let error = body["data"]["b"]["error"].as_str().unwrap();
    assert!(error.contains("no compatible device"));
}

#[tokio::test]
async fn rescan_reports_no_change() {
    let host = Host::new();
    let router = host.router().await;

    let (status, body) = call(&router, "POST", "/api/v1/rescan", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["added"].as_array().unwrap().is_empty());
    assert!(body["data"]["removed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let host = Host::new();
    let router = host.router().await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/claims/prepare")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
}
