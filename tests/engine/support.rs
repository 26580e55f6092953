#![allow(dead_code)]

use std::sync::Arc;

use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use critiq::catalog::CatalogSnapshot;
use critiq::config::Config;
use critiq::session::{
    FeedbackEvent, FeedbackSession, SessionRecorder, StreamMultiplexer, resolve_plan, run_session,
};
use critiq::store::memory::MemoryStore;

pub const FEEDBACK_ID: &str = "9d1aa2c0-0000-4000-8000-0000000000aa";

pub fn feedback_id() -> Uuid {
    FEEDBACK_ID.parse().unwrap()
}

/// NDJSON body an Ollama `/api/chat` call streams back.
pub fn ollama_chat_body(parts: &[&str]) -> String {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!(
            "{{\"message\":{{\"role\":\"assistant\",\"content\":{}}},\"done\":false}}\n",
            serde_json::to_string(part).unwrap()
        ));
    }
    body.push_str("{\"done\":true,\"prompt_eval_count\":12,\"eval_count\":7}\n");
    body
}

pub async fn mount_ollama(server: &MockServer, parts: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(ollama_chat_body(parts), "application/x-ndjson"),
        )
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(status).set_body_string("scripted failure"))
        .mount(server)
        .await;
}

pub fn snapshot(toml: &str) -> CatalogSnapshot {
    let config: Config = toml::from_str(toml).unwrap();
    CatalogSnapshot::from_config(&config).unwrap()
}

pub struct RunOutput {
    pub events: Vec<FeedbackEvent>,
    pub session: FeedbackSession,
    pub store: Arc<MemoryStore>,
}

pub async fn run(snapshot: &CatalogSnapshot, submission: &str) -> RunOutput {
    run_with_correlation(snapshot, submission, Uuid::new_v4()).await
}

pub async fn run_with_correlation(
    snapshot: &CatalogSnapshot,
    submission: &str,
    correlation_id: Uuid,
) -> RunOutput {
    let plan = snapshot.feedback(feedback_id()).unwrap();
    let criteria = resolve_plan(snapshot, &plan).unwrap();

    let (mux, mut rx) = StreamMultiplexer::channel();
    let store = Arc::new(MemoryStore::new());
    let recorder = SessionRecorder::new(store.clone());

    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });

    let session = run_session(&plan, &criteria, correlation_id, submission, mux, &recorder).await;
    let events = collector.await.unwrap();

    RunOutput {
        events,
        session,
        store,
    }
}

pub fn event_rank(event: &FeedbackEvent) -> Option<u32> {
    match event {
        FeedbackEvent::Delta { rank, .. }
        | FeedbackEvent::CriterionComplete { rank }
        | FeedbackEvent::CriterionError { rank, .. } => Some(*rank),
        FeedbackEvent::SessionComplete { .. } => None,
    }
}

/// Every event for rank N precedes any event for rank N+1; a rank never
/// reappears after a later one has started.
pub fn assert_grouped_by_ascending_rank(events: &[FeedbackEvent]) {
    let mut current: Option<u32> = None;
    for rank in events.iter().filter_map(event_rank) {
        match current {
            Some(open) if rank == open => {}
            Some(open) => {
                assert!(
                    rank > open,
                    "rank {rank} appeared after rank {open} had started"
                );
                current = Some(rank);
            }
            None => current = Some(rank),
        }
    }
}
