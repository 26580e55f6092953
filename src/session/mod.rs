//! Session domain types: the per-criterion results assembled during a run
//! and the finalized, rank-ordered feedback session handed to persistence.

pub mod orchestrator;
pub mod recorder;
pub mod stream;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProviderErrorKind;
use crate::providers::{EndpointRole, TokenUsage};

pub use orchestrator::{ResolvedCriterion, resolve_plan, run_session};
pub use recorder::{RecordOutcome, SessionRecorder};
pub use stream::{EVENT_CHANNEL_CAPACITY, FeedbackEvent, StreamMultiplexer};

/// Overall outcome of one orchestration run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CriterionStatus {
    Success,
    Error,
}

/// Everything that can sink a single criterion: the provider taxonomy plus
/// template rendering.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    Auth,
    ModelNotFound,
    BadRequest,
    Server,
    MalformedResponse,
    Template,
}

impl From<ProviderErrorKind> for FailureKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::Timeout => Self::Timeout,
            ProviderErrorKind::Transport => Self::Transport,
            ProviderErrorKind::Auth => Self::Auth,
            ProviderErrorKind::ModelNotFound => Self::ModelNotFound,
            ProviderErrorKind::BadRequest => Self::BadRequest,
            ProviderErrorKind::Server => Self::Server,
            ProviderErrorKind::MalformedResponse => Self::MalformedResponse,
        }
    }
}

/// One criterion's finished outcome within a session, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub rank: u32,
    pub criterion_id: Uuid,
    pub title: String,
    pub status: CriterionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_by: Option<EndpointRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl CriterionResult {
    pub fn succeeded(&self) -> bool {
        self.status == CriterionStatus::Success
    }
}

/// One submission's end-to-end orchestration result. Recorded at most once
/// per correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSession {
    pub correlation_id: Uuid,
    pub feedback_id: Uuid,
    pub submission: String,
    /// Rank-ordered, one entry per criterion that finished before the run
    /// ended (all of them unless the client disconnected mid-run).
    pub results: Vec<CriterionResult>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nps_score: Option<u8>,
    pub created_at: DateTime<Utc>,
}

/// All succeeded → Success; at least one → PartialSuccess; none → Failed.
pub fn status_of(results: &[CriterionResult]) -> SessionStatus {
    let succeeded = results.iter().filter(|result| result.succeeded()).count();
    if succeeded == results.len() && !results.is_empty() {
        SessionStatus::Success
    } else if succeeded > 0 {
        SessionStatus::PartialSuccess
    } else {
        SessionStatus::Failed
    }
}
