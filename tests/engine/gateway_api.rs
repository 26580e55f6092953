//! The HTTP surface end to end: SSE framing, pre-stream rejections, and the
//! session read/score API.

use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::MockServer;

use critiq::catalog::{Catalog, CatalogSnapshot};
use critiq::config::Config;
use critiq::gateway::{self, AppState};
use critiq::store::SessionStore;
use critiq::store::memory::MemoryStore;

use crate::support;

struct ApiTestServer {
    port: u16,
    store: Arc<MemoryStore>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl ApiTestServer {
    async fn start(toml: &str) -> Self {
        let config: Config = toml::from_str(toml).unwrap();
        let snapshot = CatalogSnapshot::from_config(&config).unwrap();
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(Catalog::new(snapshot), store.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(gateway::serve_with_listener(state, listener));

        Self {
            port,
            store,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    fn stream_url(&self, feedback_id: &str) -> String {
        self.url(&format!("/api/feedback/{feedback_id}/stream"))
    }
}

impl Drop for ApiTestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn single_criterion_toml(uri: &str) -> String {
    format!(
        r#"
        [[provider]]
        id = "lab"
        kind = "ollama"
        primary_endpoint = "{uri}"

        [[model]]
        id = "model"
        provider = "lab"
        model_name = "phi4:latest"
        is_default = true

        [[feedback]]
        id = "{feedback}"
        task_title = "Essay 1"

        [[feedback.criterion]]
        id = "9d1aa2c0-0000-4000-8000-000000000001"
        title = "Structure"
        rank = 1
        prompt = "Assess the structure of ##submission##"
        "#,
        feedback = support::FEEDBACK_ID,
    )
}

/// Split an SSE body into (event name, parsed data) pairs.
fn parse_frames(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut name = String::new();
            let mut data = String::new();
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    name = rest.to_string();
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data.push_str(rest);
                }
            }
            (name, serde_json::from_str(&data).unwrap())
        })
        .collect()
}

#[tokio::test]
async fn stream_endpoint_emits_ordered_sse_frames() {
    let backend = MockServer::start().await;
    support::mount_ollama(&backend, &["Clear ", "thesis."]).await;

    let server = ApiTestServer::start(&single_criterion_toml(&backend.uri())).await;
    let response = reqwest::Client::new()
        .post(server.stream_url(support::FEEDBACK_ID))
        .json(&json!({ "submission": "my essay" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .unwrap()
            .to_str()
            .unwrap(),
        "no-cache"
    );
    let correlation_id: Uuid = response
        .headers()
        .get("x-correlation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let body = response.text().await.unwrap();
    let frames = parse_frames(&body);

    assert!(frames.len() >= 3, "expected delta + complete + session end");
    assert_eq!(frames[0].0, "delta");
    assert_eq!(frames[0].1["rank"], 1);

    let names: Vec<&str> = frames.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names[names.len() - 2], "criterion_complete");
    assert_eq!(names[names.len() - 1], "session_complete");
    assert_eq!(frames.last().unwrap().1["status"], "success");

    // The finalized record is queryable once the stream has ended.
    let session = server
        .store
        .fetch_session(correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.results[0].text.as_deref(), Some("Clear thesis."));
}

#[tokio::test]
async fn unknown_feedback_is_a_plain_not_found() {
    let backend = MockServer::start().await;
    let server = ApiTestServer::start(&single_criterion_toml(&backend.uri())).await;

    let response = reqwest::Client::new()
        .post(server.stream_url("11111111-2222-4333-8444-555555555555"))
        .json(&json!({ "submission": "my essay" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert!(server.store.is_empty());
}

#[tokio::test]
async fn plan_without_active_criteria_is_rejected_before_streaming() {
    let backend = MockServer::start().await;
    support::mount_ollama(&backend, &["never called"]).await;

    let toml = format!(
        r#"
        [[provider]]
        id = "lab"
        kind = "ollama"
        primary_endpoint = "{uri}"

        [[model]]
        id = "model"
        provider = "lab"
        model_name = "phi4:latest"
        is_default = true

        [[feedback]]
        id = "{feedback}"

        [[feedback.criterion]]
        id = "9d1aa2c0-0000-4000-8000-000000000001"
        title = "Retired"
        rank = 1
        prompt = "Assess ##submission##"
        active = false
        "#,
        uri = backend.uri(),
        feedback = support::FEEDBACK_ID,
    );

    let server = ApiTestServer::start(&toml).await;
    let response = reqwest::Client::new()
        .post(server.stream_url(support::FEEDBACK_ID))
        .json(&json!({ "submission": "my essay" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    let error: Value = response.json().await.unwrap();
    assert!(
        error["error"]
            .as_str()
            .unwrap()
            .contains("no active criteria")
    );

    // No stream started, no session recorded, no backend call made.
    assert!(server.store.is_empty());
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_submission_is_a_bad_request() {
    let backend = MockServer::start().await;
    let server = ApiTestServer::start(&single_criterion_toml(&backend.uri())).await;

    let response = reqwest::Client::new()
        .post(server.stream_url(support::FEEDBACK_ID))
        .json(&json!({ "submission": "   " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_read_and_score_round_trip() {
    let backend = MockServer::start().await;
    support::mount_ollama(&backend, &["Well ", "argued."]).await;

    let server = ApiTestServer::start(&single_criterion_toml(&backend.uri())).await;
    let client = reqwest::Client::new();
    let correlation_id = Uuid::new_v4();

    let body = client
        .post(server.stream_url(support::FEEDBACK_ID))
        .json(&json!({ "submission": "my essay", "correlation_id": correlation_id }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("session_complete"));

    let session: Value = client
        .get(server.url(&format!("/api/session/{correlation_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["status"], "success");
    assert_eq!(session["results"][0]["rank"], 1);
    assert_eq!(session["results"][0]["text"], "Well argued.");

    let response = client
        .post(server.url(&format!("/api/session/{correlation_id}/score")))
        .json(&json!({ "score": 8 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let session: Value = client
        .get(server.url(&format!("/api/session/{correlation_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["nps_score"], 8);
}

#[tokio::test]
async fn score_validation_and_unknown_sessions() {
    let backend = MockServer::start().await;
    let server = ApiTestServer::start(&single_criterion_toml(&backend.uri())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url(&format!("/api/session/{}/score", Uuid::new_v4())))
        .json(&json!({ "score": 11 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .post(server.url(&format!("/api/session/{}/score", Uuid::new_v4())))
        .json(&json!({ "score": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client
        .get(server.url(&format!("/api/session/{}", Uuid::new_v4())))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
