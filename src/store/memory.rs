use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::SessionStore;
use crate::error::StoreError;
use crate::session::FeedbackSession;

/// In-process store with the same first-write-wins contract as the SQLite
/// backend.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, FeedbackSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &FeedbackSession) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if sessions.contains_key(&session.correlation_id) {
            return Ok(false);
        }
        sessions.insert(session.correlation_id, session.clone());
        Ok(true)
    }

    async fn fetch_session(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<FeedbackSession>, StoreError> {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(sessions.get(&correlation_id).cloned())
    }

    async fn attach_score(&self, correlation_id: Uuid, score: u8) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match sessions.get_mut(&correlation_id) {
            Some(session) => {
                session.nps_score = Some(score);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
