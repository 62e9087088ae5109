//! End-to-end demo run against a mocked Compute Engine API

mod common;

use anyhow::Result;
use common::*;
use gce_startup::demo::{self, DemoOutcome, DemoPlan, Prompt};
use serde_json::json;
use std::path::PathBuf;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records prompts instead of reading stdin
#[derive(Default)]
struct ScriptedPrompt {
    messages: Vec<String>,
}

impl Prompt for ScriptedPrompt {
    fn wait_for_enter(&mut self, message: &str) -> Result<()> {
        self.messages.push(message.to_string());
        Ok(())
    }
}

fn plan(script: PathBuf) -> DemoPlan {
    DemoPlan {
        instance_name: "demo".to_string(),
        startup_script: script,
        image_url: "http://example.com/cat.png".to_string(),
        image_text: "Hello from the test".to_string(),
        bucket: "demo-bucket".to_string(),
    }
}

async fn mount_insert(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(INSTANCES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-insert", "PENDING")))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(zone_operation_path("op-insert")))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-insert", "RUNNING")))
        .up_to_n_times(2)
        .expect(2)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(zone_operation_path("op-insert")))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-insert", "DONE")))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_run_then_second_stop_fails() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("startup.sh");
    std::fs::write(&script, "#!/bin/bash\necho ok\n").unwrap();

    mount_insert(&server).await;
    Mock::given(method("GET"))
        .and(path(INSTANCES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [instance("demo")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(instance_path("demo")))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-delete", "PENDING")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(instance_path("demo")))
        .respond_with(ResponseTemplate::new(404).set_body_json(api_error(
            404,
            "notFound",
            "The resource 'projects/test-project/zones/us-central1-a/instances/demo' was not found",
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(zone_operation_path("op-delete")))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-delete", "DONE")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let plan = plan(script);
    let mut prompt = ScriptedPrompt::default();
    let mut out = Vec::new();

    let outcome = demo::run(&client, &plan, &mut prompt, &mut out).await.unwrap();
    assert!(matches!(outcome, DemoOutcome::Completed));
    assert_eq!(prompt.messages.len(), 1);

    let output = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines,
        [
            "Starting up an instance",
            "Here are your running instances:",
            "demo",
            "Visit http://storage.googleapis.com/demo-bucket/output.png",
            "It might take a minute for the output.png file to show up.",
            "Shutting down the instance",
        ]
    );

    let err = client.stop_instance("demo").await.unwrap_err();
    assert!(err.as_operation_error().unwrap().has_code("notFound"));
}

#[tokio::test]
async fn test_start_failure_skips_prompt_and_shutdown() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("startup.sh");
    std::fs::write(&script, "#!/bin/bash\n").unwrap();

    Mock::given(method("POST"))
        .and(path(INSTANCES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(failed_operation(
            "op-insert",
            &[("ZONE_RESOURCE_POOL_EXHAUSTED", "The zone does not have enough resources")],
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-delete", "DONE")))
        .expect(0)
        .mount(&server)
        .await;

    let mut prompt = ScriptedPrompt::default();
    let mut out = Vec::new();
    let outcome = demo::run(&client(&server), &plan(script), &mut prompt, &mut out)
        .await
        .unwrap();

    match outcome {
        DemoOutcome::StartFailed(err) => assert!(err.has_code("ZONE_RESOURCE_POOL_EXHAUSTED")),
        other => panic!("expected start failure, got {:?}", other),
    }
    assert!(prompt.messages.is_empty());

    let output = String::from_utf8(out).unwrap();
    assert!(output.contains("Error starting instance"));
    assert!(output.contains("The zone does not have enough resources"));
    assert!(!output.contains("Shutting down"));
}

#[tokio::test]
async fn test_stop_failure_is_reported() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("startup.sh");
    std::fs::write(&script, "#!/bin/bash\n").unwrap();

    mount_insert(&server).await;
    Mock::given(method("GET"))
        .and(path(INSTANCES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(instance_path("demo")))
        .respond_with(ResponseTemplate::new(200).set_body_json(failed_operation(
            "op-delete",
            &[("RESOURCE_IN_USE_BY_ANOTHER_RESOURCE", "Disk is in use")],
        )))
        .mount(&server)
        .await;

    let mut prompt = ScriptedPrompt::default();
    let mut out = Vec::new();
    let outcome = demo::run(&client(&server), &plan(script), &mut prompt, &mut out)
        .await
        .unwrap();

    assert!(matches!(outcome, DemoOutcome::StopFailed(_)));
    assert!(!outcome.is_success());
    assert_eq!(prompt.messages, ["Hit Enter when done to shutdown instance"]);
    assert!(String::from_utf8(out).unwrap().contains("Error stopping instance"));
}

#[tokio::test]
async fn test_missing_script_aborts_the_run() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut prompt = ScriptedPrompt::default();
    let mut out = Vec::new();
    let result = demo::run(
        &client(&server),
        &plan(dir.path().join("absent.sh")),
        &mut prompt,
        &mut out,
    )
    .await;

    assert!(result.is_err());
    assert!(server.received_requests().await.unwrap().is_empty());
}
