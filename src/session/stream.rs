//! The single ordered event stream a client sees.
//!
//! Events travel over a bounded channel so a slow consumer backpressures the
//! provider transport instead of ballooning memory. The multiplexer is the
//! only producer and enforces the ordering contract: every event for rank N
//! precedes any event for rank N+1, ranks strictly ascend, and
//! `session_complete` is terminal.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{FailureKind, SessionStatus};
use crate::error::StreamError;

/// Matches the buffer depth the streaming view has always used between the
/// provider feeder and the response body.
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackEvent {
    Delta { rank: u32, text: String },
    CriterionComplete { rank: u32 },
    CriterionError { rank: u32, error: FailureKind },
    SessionComplete { status: SessionStatus },
}

impl FeedbackEvent {
    /// Wire name, used as the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::CriterionComplete { .. } => "criterion_complete",
            Self::CriterionError { .. } => "criterion_error",
            Self::SessionComplete { .. } => "session_complete",
        }
    }
}

/// Serializes per-criterion output into the client-facing event sequence.
///
/// Tiny token fragments are batched until a whitespace boundary before being
/// sent, so the wire carries words rather than single characters.
pub struct StreamMultiplexer {
    tx: mpsc::Sender<FeedbackEvent>,
    open: Option<u32>,
    last_closed: Option<u32>,
    pending: String,
    finished: bool,
}

impl StreamMultiplexer {
    pub fn channel() -> (Self, mpsc::Receiver<FeedbackEvent>) {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<FeedbackEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                open: None,
                last_closed: None,
                pending: String::new(),
                finished: false,
            },
            rx,
        )
    }

    fn open_rank(&mut self, rank: u32) {
        debug_assert!(!self.finished, "event after session_complete");
        match self.open {
            Some(current) => {
                debug_assert_eq!(current, rank, "criterion ranks must not interleave");
            }
            None => {
                debug_assert!(
                    self.last_closed.is_none_or(|closed| closed < rank),
                    "criterion ranks must ascend"
                );
                self.open = Some(rank);
            }
        }
    }

    async fn send(&self, event: FeedbackEvent) -> Result<(), StreamError> {
        self.tx.send(event).await.map_err(|_| StreamError::Closed)
    }

    async fn flush_pending(&mut self, rank: u32) -> Result<(), StreamError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.pending);
        self.send(FeedbackEvent::Delta { rank, text }).await
    }

    pub async fn delta(&mut self, rank: u32, text: &str) -> Result<(), StreamError> {
        self.open_rank(rank);
        self.pending.push_str(text);
        if text.contains(char::is_whitespace) {
            self.flush_pending(rank).await?;
        }
        Ok(())
    }

    pub async fn criterion_complete(&mut self, rank: u32) -> Result<(), StreamError> {
        self.open_rank(rank);
        self.flush_pending(rank).await?;
        self.send(FeedbackEvent::CriterionComplete { rank }).await?;
        self.open = None;
        self.last_closed = Some(rank);
        Ok(())
    }

    pub async fn criterion_error(
        &mut self,
        rank: u32,
        error: FailureKind,
    ) -> Result<(), StreamError> {
        self.open_rank(rank);
        self.flush_pending(rank).await?;
        self.send(FeedbackEvent::CriterionError { rank, error }).await?;
        self.open = None;
        self.last_closed = Some(rank);
        Ok(())
    }

    pub async fn session_complete(&mut self, status: SessionStatus) -> Result<(), StreamError> {
        debug_assert!(self.open.is_none(), "session_complete with a criterion open");
        self.finished = true;
        self.send(FeedbackEvent::SessionComplete { status }).await
    }
}
