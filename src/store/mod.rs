//! Session persistence surface. The engine only ever talks to the
//! [`SessionStore`] trait; the SQLite implementation is the shipped backend,
//! the in-memory one backs tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::FeedbackSession;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a finalized session. Returns `false` when a session with the
    /// same correlation id already exists — the write is skipped and the
    /// stored record stays untouched.
    async fn insert_session(&self, session: &FeedbackSession) -> Result<bool, StoreError>;

    async fn fetch_session(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<FeedbackSession>, StoreError>;

    /// Attach a helpfulness score (1-10) to an already-recorded session.
    /// Returns `false` when no such session exists.
    async fn attach_score(&self, correlation_id: Uuid, score: u8) -> Result<bool, StoreError>;
}
