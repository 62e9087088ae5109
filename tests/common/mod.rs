//! Shared fixtures for the mock-server tests

#![allow(dead_code)]

use gce_startup::compute::{ComputeClient, ComputeConfig, PollPolicy};
use gce_startup::gcp::auth::Authenticator;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::MockServer;

pub const PROJECT: &str = "test-project";
pub const ZONE: &str = "us-central1-a";
pub const TOKEN: &str = "test-token";

pub const INSTANCES_PATH: &str = "/compute/v1/projects/test-project/zones/us-central1-a/instances";

pub fn instance_path(name: &str) -> String {
    format!("{}/{}", INSTANCES_PATH, name)
}

pub fn zone_operation_path(name: &str) -> String {
    format!(
        "/compute/v1/projects/test-project/zones/us-central1-a/operations/{}",
        name
    )
}

/// Client pointed at the mock server, polling every few milliseconds
pub fn client(server: &MockServer) -> ComputeClient {
    client_with_policy(server, PollPolicy::fixed(Duration::from_millis(5)))
}

pub fn client_with_policy(server: &MockServer, policy: PollPolicy) -> ComputeClient {
    let config = ComputeConfig::new(PROJECT, ZONE).with_endpoint(&format!("{}/compute/v1", server.uri()));
    ComputeClient::new(config, Authenticator::Static(TOKEN.to_string()))
        .expect("client should build")
        .with_poll_policy(policy)
}

/// Zonal operation resource in `status`
pub fn operation(name: &str, status: &str) -> Value {
    json!({
        "kind": "compute#operation",
        "id": "1234567890",
        "name": name,
        "zone": format!("https://www.googleapis.com/compute/v1/projects/{}/zones/{}", PROJECT, ZONE),
        "operationType": "insert",
        "targetLink": format!("https://www.googleapis.com/compute/v1/projects/{}/zones/{}/instances/demo", PROJECT, ZONE),
        "status": status
    })
}

/// Finished operation carrying `errors` as (code, message) pairs
pub fn failed_operation(name: &str, errors: &[(&str, &str)]) -> Value {
    let mut op = operation(name, "DONE");
    op["error"] = json!({
        "errors": errors
            .iter()
            .map(|(code, message)| json!({"code": code, "message": message}))
            .collect::<Vec<_>>()
    });
    op
}

/// Google API error body as returned with a non-2xx status
pub fn api_error(code: u16, reason: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message,
            "errors": [{"domain": "global", "reason": reason, "message": message}]
        }
    })
}

pub fn instance(name: &str) -> Value {
    json!({
        "kind": "compute#instance",
        "name": name,
        "zone": format!("https://www.googleapis.com/compute/v1/projects/{}/zones/{}", PROJECT, ZONE),
        "machineType": format!("https://www.googleapis.com/compute/v1/projects/{}/zones/{}/machineTypes/n1-standard-1", PROJECT, ZONE),
        "status": "RUNNING"
    })
}
