//! SQLite persistence: round-trip fidelity and first-write-wins.

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use critiq::providers::{EndpointRole, TokenUsage};
use critiq::session::{
    CriterionResult, CriterionStatus, FailureKind, FeedbackSession, SessionStatus,
};
use critiq::store::SessionStore;
use critiq::store::sqlite::SqliteStore;

fn sample_session(correlation_id: Uuid) -> FeedbackSession {
    FeedbackSession {
        correlation_id,
        feedback_id: Uuid::new_v4(),
        submission: "my essay about rivers".into(),
        results: vec![
            CriterionResult {
                rank: 1,
                criterion_id: Uuid::new_v4(),
                title: "Structure".into(),
                status: CriterionStatus::Success,
                text: Some("Clear thesis.\n\nParagraphs flow well.".into()),
                error_kind: None,
                model_name: Some("phi4:latest".into()),
                served_by: Some(EndpointRole::Fallback),
                usage: Some(TokenUsage {
                    prompt_tokens: 812,
                    completion_tokens: 64,
                }),
            },
            CriterionResult {
                rank: 2,
                criterion_id: Uuid::new_v4(),
                title: "Evidence".into(),
                status: CriterionStatus::Error,
                text: None,
                error_kind: Some(FailureKind::BadRequest),
                model_name: Some("phi4:latest".into()),
                served_by: None,
                usage: None,
            },
        ],
        status: SessionStatus::PartialSuccess,
        nps_score: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn round_trip_preserves_results_order_and_status() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("sessions.db"))
        .await
        .unwrap();

    let correlation_id = Uuid::new_v4();
    let session = sample_session(correlation_id);
    assert!(store.insert_session(&session).await.unwrap());

    let stored = store.fetch_session(correlation_id).await.unwrap().unwrap();
    assert_eq!(stored, session);

    let ranks: Vec<u32> = stored.results.iter().map(|result| result.rank).collect();
    assert_eq!(ranks, vec![1, 2]);
    assert_eq!(stored.results[0].served_by, Some(EndpointRole::Fallback));
    assert_eq!(stored.results[0].usage.unwrap().prompt_tokens, 812);
    assert_eq!(stored.results[1].error_kind, Some(FailureKind::BadRequest));
}

#[tokio::test]
async fn duplicate_insert_leaves_the_first_record_untouched() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("sessions.db"))
        .await
        .unwrap();

    let correlation_id = Uuid::new_v4();
    let first = sample_session(correlation_id);
    assert!(store.insert_session(&first).await.unwrap());

    let mut retry = sample_session(correlation_id);
    retry.submission = "a retried body that must not overwrite".into();
    retry.status = SessionStatus::Failed;
    assert!(!store.insert_session(&retry).await.unwrap());

    let stored = store.fetch_session(correlation_id).await.unwrap().unwrap();
    assert_eq!(stored, first);
}

#[tokio::test]
async fn sessions_survive_a_store_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sessions.db");

    let correlation_id = Uuid::new_v4();
    let session = sample_session(correlation_id);
    {
        let store = SqliteStore::open(&path).await.unwrap();
        store.insert_session(&session).await.unwrap();
    }

    let reopened = SqliteStore::open(&path).await.unwrap();
    let stored = reopened
        .fetch_session(correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, session);
}

#[tokio::test]
async fn score_attaches_without_touching_results() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("sessions.db"))
        .await
        .unwrap();

    let correlation_id = Uuid::new_v4();
    let session = sample_session(correlation_id);
    store.insert_session(&session).await.unwrap();

    assert!(store.attach_score(correlation_id, 9).await.unwrap());
    let stored = store.fetch_session(correlation_id).await.unwrap().unwrap();
    assert_eq!(stored.nps_score, Some(9));
    assert_eq!(stored.results, session.results);

    assert!(!store.attach_score(Uuid::new_v4(), 9).await.unwrap());
}

#[tokio::test]
async fn unknown_correlation_id_reads_as_none() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("sessions.db"))
        .await
        .unwrap();

    assert!(
        store
            .fetch_session(Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}
