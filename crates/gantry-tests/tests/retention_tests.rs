//! Cleanup job against a stubbed GitHub REST API.

use gantry_artifacts::MemoryArtifactStore;
use gantry_core::pipeline::CLEANUP_TOOL;
use gantry_core::run::{JobStatus, RunStatus};
use gantry_retention::{CleanupTool, GithubClient};
use gantry_runner::ToolRouter;
use gantry_scheduler::{CancelSignal, RunExecutor, Scheduler};
use gantry_tests::{PipelineFixture, TriggerFixture, init_test_logging};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tokio_test::assert_ok;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLEANUP_PIPELINE: &str = r#"
version: "1"
name: housekeeping
retention:
  keep_last: 2
  registry: { owner: org, package: repo }
  runs: { owner: org, repo: repo, workflow: ci.yml }
jobs:
  - name: cleanup
    always: true
    tool: gantry/cleanup
    args: ["${{ vars.CURRENT_RUN }}"]
    outputs: [kept, deleted, failed]
variables:
  CURRENT_RUN: "100"
"#;

fn version(id: u64, day: u32, tags: &[&str]) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("sha256:{:064}", id),
        "created_at": format!("2026-03-{:02}T12:00:00Z", day),
        "metadata": {"package_type": "container", "container": {"tags": tags}}
    })
}

fn run(id: u64, day: u32, status: &str) -> serde_json::Value {
    let conclusion = (status == "completed").then_some("success");
    json!({
        "id": id,
        "status": status,
        "conclusion": conclusion,
        "created_at": format!("2026-03-{:02}T12:00:00Z", day),
    })
}

async fn scheduler(server: &MockServer) -> Scheduler {
    let definition = PipelineFixture::parse(CLEANUP_PIPELINE);
    let retention = definition.retention.clone().unwrap();
    let client = GithubClient::new(Some("t0ken".into()))
        .unwrap()
        .with_base_url(&server.uri())
        .unwrap();
    let router = ToolRouter::new().route(
        CLEANUP_TOOL,
        Arc::new(CleanupTool::from_config(&retention, client)),
    );
    let executor = RunExecutor::new(Arc::new(router), Arc::new(MemoryArtifactStore::new()));
    Scheduler::new(&definition, executor).unwrap()
}

#[tokio::test]
async fn test_cleanup_trims_registry_and_history() {
    init_test_logging();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/org/packages/container/repo/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            version(5, 5, &["sha-e"]),
            version(4, 4, &["sha-d"]),
            version(3, 3, &["sha-c"]),
            version(2, 2, &["sha-b"]),
            version(1, 1, &["sha-a"]),
            version(9, 6, &[]),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/orgs/org/packages/container/repo/versions/(1|2|3|9)$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(4)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/org/repo/actions/workflows/ci.yml/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 4,
            "workflow_runs": [
                run(103, 4, "completed"),
                run(102, 3, "completed"),
                run(101, 2, "completed"),
                run(100, 1, "in_progress"),
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/repos/org/repo/actions/runs/101"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let report = assert_ok!(
        scheduler(&server)
            .await
            .handle_trigger(TriggerFixture::push_main(["src/app.js"]), CancelSignal::never())
            .await
    );

    assert_eq!(report.status, RunStatus::Success);
    let cleanup = report.job("cleanup").unwrap();
    assert_eq!(cleanup.status, JobStatus::Success);
    assert_eq!(cleanup.outputs.get("deleted"), Some("5"));
    assert_eq!(cleanup.outputs.get("failed"), Some("0"));
    assert!(cleanup.warnings.is_empty());
}

#[tokio::test]
async fn test_unreachable_registry_is_a_warning() {
    init_test_logging();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/org/packages/container/repo/versions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/repo/actions/workflows/ci.yml/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 0,
            "workflow_runs": []
        })))
        .mount(&server)
        .await;

    let report = assert_ok!(
        scheduler(&server)
            .await
            .handle_trigger(TriggerFixture::push_main(["src/app.js"]), CancelSignal::never())
            .await
    );

    assert_eq!(report.status, RunStatus::Success);
    let cleanup = report.job("cleanup").unwrap();
    assert_eq!(cleanup.status, JobStatus::Success);
    assert_eq!(cleanup.warnings.len(), 1);
    assert!(cleanup.warnings[0].contains("upstream down"));
}
