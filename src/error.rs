use thiserror::Error;
use uuid::Uuid;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `critiq`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; the binary continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Config / catalog ─────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Prompt rendering ─────────────────────────────────────────────────
    #[error("template: {0}")]
    Template(#[from] TemplateError),

    // ── Provider / backend ───────────────────────────────────────────────
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    // ── Session persistence ──────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Client-facing event stream ───────────────────────────────────────
    #[error("stream: {0}")]
    Stream(#[from] StreamError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config / catalog errors ─────────────────────────────────────────────────

/// Fatal configuration problems. These abort a run before any provider call
/// or stream event; everything else degrades per criterion.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown feedback {0}")]
    UnknownFeedback(Uuid),

    #[error("feedback {0} has no active criteria")]
    NoActiveCriteria(Uuid),

    #[error("no default model configured and criterion {criterion} assigns none")]
    NoDefaultModel { criterion: Uuid },

    #[error("criterion {criterion} references unknown model {model}")]
    UnknownModel { criterion: Uuid, model: String },

    #[error("model {model} references unknown provider {provider}")]
    UnknownProvider { model: String, provider: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Prompt / template errors ────────────────────────────────────────────────

/// A `##placeholder##` in a criterion template that has no context value.
/// Non-retryable; the orchestrator records it and moves on.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown placeholder ##{name}##")]
pub struct TemplateError {
    pub name: String,
}

// ─── Provider errors ─────────────────────────────────────────────────────────

/// Failure classes a backend call can end in. The failover machine keys its
/// routing decision off this; `Timeout`/`Transport`/`Server` drive fallback,
/// `Auth` only when the fallback credential differs, the rest are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    Transport,
    Auth,
    ModelNotFound,
    BadRequest,
    Server,
    MalformedResponse,
}

impl ProviderErrorKind {
    /// Whether this kind may be retried against a different endpoint at all.
    /// `Auth` has an extra credential condition checked by the invoker.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Transport | Self::Server | Self::Auth
        )
    }
}

#[derive(Debug, Error, Clone)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transport, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::MalformedResponse, message)
    }
}

// ─── Session store errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record for session {correlation_id}: {message}")]
    Corrupt {
        correlation_id: Uuid,
        message: String,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Event stream errors ─────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The consumer dropped the receiving end; the run is cancelled and
    /// whatever completed so far gets recorded.
    #[error("event stream closed by consumer")]
    Closed,
}

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
