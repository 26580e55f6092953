//! Recorder idempotency and disconnect handling.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use wiremock::MockServer;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use critiq::session::{
    FeedbackEvent, SessionRecorder, SessionStatus, StreamMultiplexer, resolve_plan, run_session,
};
use critiq::store::SessionStore;
use critiq::store::memory::MemoryStore;

use crate::support;

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

        [[feedback.criterion]]
        id = "9d1aa2c0-0000-4000-8000-000000000001"
        title = "Structure"
        rank = 1
        prompt = "Assess ##submission##"
        "#,
        feedback = support::FEEDBACK_ID,
    )
}

#[tokio::test]
async fn same_correlation_id_is_recorded_once() {
    let server = MockServer::start().await;
    support::mount_ollama(&server, &["first run "]).await;

    let snapshot = support::snapshot(&single_criterion_toml(&server.uri()));
    let correlation_id = Uuid::new_v4();

    let plan = snapshot.feedback(support::feedback_id()).unwrap();
    let criteria = resolve_plan(&snapshot, &plan).unwrap();

    let store = Arc::new(MemoryStore::new());
    let recorder = SessionRecorder::new(store.clone());

    for _ in 0..2 {
        let (mux, mut rx) = StreamMultiplexer::channel();
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        run_session(&plan, &criteria, correlation_id, "essay", mux, &recorder).await;
        drain.await.unwrap();
    }

    assert_eq!(store.len(), 1);
    let stored = store.fetch_session(correlation_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Success);
}

#[tokio::test]
async fn immediate_disconnect_still_records_a_failed_session() {
    let server = MockServer::start().await;
    support::mount_ollama(&server, &["never seen "]).await;

    let snapshot = support::snapshot(&single_criterion_toml(&server.uri()));
    let plan = snapshot.feedback(support::feedback_id()).unwrap();
    let criteria = resolve_plan(&snapshot, &plan).unwrap();

    let store = Arc::new(MemoryStore::new());
    let recorder = SessionRecorder::new(store.clone());
    let correlation_id = Uuid::new_v4();

    let (mux, rx) = StreamMultiplexer::channel();
    drop(rx);

    let session = run_session(&plan, &criteria, correlation_id, "essay", mux, &recorder).await;

    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.results.is_empty());
    assert!(store.fetch_session(correlation_id).await.unwrap().is_some());
}

#[tokio::test]
async fn disconnect_mid_run_records_the_completed_prefix() {
    let fast = MockServer::start().await;
    let slow = MockServer::start().await;
    support::mount_ollama(&fast, &["quick result "]).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_raw(support::ollama_chat_body(&["slow "]), "application/x-ndjson"),
        )
        .mount(&slow)
        .await;

    let toml = format!(
        r#"
        [[provider]]
        id = "fast"
        kind = "ollama"
        primary_endpoint = "{fast}"

        [[provider]]
        id = "slow"
        kind = "ollama"
        primary_endpoint = "{slow}"

        [[model]]
        id = "fast-model"
        provider = "fast"
        model_name = "phi4:latest"
        is_default = true

        [[model]]
        id = "slow-model"
        provider = "slow"
        model_name = "phi4:latest"

        [[feedback]]
        id = "{feedback}"

        [[feedback.criterion]]
        id = "9d1aa2c0-0000-4000-8000-000000000001"
        title = "Fast"
        rank = 1
        prompt = "Assess ##submission##"

        [[feedback.criterion]]
        id = "9d1aa2c0-0000-4000-8000-000000000002"
        title = "Slow"
        rank = 2
        prompt = "Assess ##submission##"
        model = "slow-model"
        "#,
        fast = fast.uri(),
        slow = slow.uri(),
        feedback = support::FEEDBACK_ID,
    );

    let snapshot = support::snapshot(&toml);
    let plan = snapshot.feedback(support::feedback_id()).unwrap();
    let criteria = resolve_plan(&snapshot, &plan).unwrap();

    let store = Arc::new(MemoryStore::new());
    let recorder = SessionRecorder::new(store.clone());
    let correlation_id = Uuid::new_v4();

    let (mux, mut rx) = StreamMultiplexer::channel();
    // The client goes away right after criterion 1 finishes.
    let walker = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if matches!(event, FeedbackEvent::CriterionComplete { rank: 1 }) {
                break;
            }
        }
    });

    let session = run_session(&plan, &criteria, correlation_id, "essay", mux, &recorder).await;
    walker.await.unwrap();

    assert_eq!(session.status, SessionStatus::PartialSuccess);
    assert_eq!(session.results.len(), 1);
    assert_eq!(session.results[0].rank, 1);

    let stored = store.fetch_session(correlation_id).await.unwrap().unwrap();
    assert_eq!(stored, session);
}
