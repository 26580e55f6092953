use std::sync::Arc;

use super::FeedbackSession;
use crate::error::StoreError;
use crate::store::SessionStore;

/// What a finalize call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// A session with this correlation id already exists; the call was a
    /// no-op. Streaming transports get retried by proxies and browsers, so
    /// this is a normal occurrence, not an error.
    AlreadyRecorded,
}

/// Hands the finalized session to the persistence collaborator exactly once
/// per correlation id — first write wins.
#[derive(Clone)]
pub struct SessionRecorder {
    store: Arc<dyn SessionStore>,
}

impl SessionRecorder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, session: &FeedbackSession) -> Result<RecordOutcome, StoreError> {
        if self.store.insert_session(session).await? {
            tracing::info!(
                correlation_id = %session.correlation_id,
                status = %session.status,
                criteria = session.results.len(),
                "Feedback session recorded"
            );
            Ok(RecordOutcome::Recorded)
        } else {
            tracing::debug!(
                correlation_id = %session.correlation_id,
                "Session already recorded, ignoring duplicate finalize"
            );
            Ok(RecordOutcome::AlreadyRecorded)
        }
    }
}
