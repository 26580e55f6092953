pub mod azure_ai;
pub mod azure_openai;
mod chat_completions;
pub mod failover;
mod framing;
mod http;
pub mod ollama;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProviderError, ProviderErrorKind};

pub use failover::{
    EndpointRole, FailoverError, FailoverInvoker, FailoverSpec, Generation, TokenSink,
};

/// Backend dialect a provider speaks. Selects the adapter implementation —
/// always through [`build_adapter`], never by inspecting types at runtime.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProviderKind {
    /// Newline-delimited JSON chunks from an Ollama `/api/chat` endpoint.
    Ollama,
    /// Server-sent events from an Azure AI inference `/chat/completions`
    /// endpoint.
    AzureAi,
    /// Server-sent events from a deployment-scoped Azure OpenAI endpoint.
    AzureOpenai,
}

/// Inference parameters forwarded to the backend on every generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    /// Backend-specific defaults, matching what each dialect's service
    /// configuration historically shipped with.
    pub fn defaults_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Ollama => Self {
                temperature: 0.8,
                top_p: 0.1,
                max_tokens: None,
            },
            ProviderKind::AzureAi => Self {
                temperature: 0.8,
                top_p: 0.1,
                max_tokens: Some(2048),
            },
            ProviderKind::AzureOpenai => Self {
                temperature: 0.7,
                top_p: 1.0,
                max_tokens: Some(2000),
            },
        }
    }
}

/// Token accounting as reported by the backend, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// One element of a generation stream: a text delta, or the completion
/// marker that terminates it.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    Delta { text: String },
    Completed { usage: Option<TokenUsage> },
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenEvent, ProviderError>> + Send>>;

/// One generation call against one endpoint. The rendered criterion template
/// travels as the system prompt; the raw submission is the user turn.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub model_name: &'a str,
    pub system_prompt: &'a str,
    pub user_input: &'a str,
    pub params: GenerationParams,
}

/// Normalizes one backend's wire protocol into the uniform delta sequence.
/// One outbound call per invocation; retry policy lives in the failover
/// invoker, never here.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Endpoint this adapter talks to, for diagnostics.
    fn endpoint(&self) -> &str;

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<TokenStream, ProviderError>;

    /// Lightweight reachability/auth check used by `critiq probe`. Dialects
    /// that need a model in the request use `model_name`; Ollama ignores it
    /// and lists the installed tags instead.
    async fn probe(&self, model_name: &str) -> Result<(), ProviderError>;
}

/// Everything an adapter needs to talk to one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: Url,
    pub api_key: Option<String>,
    pub verify_tls: bool,
    pub request_timeout: Duration,
    pub api_version: Option<String>,
}

/// The one place a provider kind is turned into an adapter.
pub fn build_adapter(kind: ProviderKind, endpoint: &EndpointConfig) -> Box<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Ollama => Box::new(ollama::OllamaAdapter::new(endpoint)),
        ProviderKind::AzureAi => Box::new(azure_ai::AzureAiAdapter::new(endpoint)),
        ProviderKind::AzureOpenai => Box::new(azure_openai::AzureOpenAiAdapter::new(endpoint)),
    }
}

const MAX_API_ERROR_CHARS: usize = 200;

fn kind_for_status(status: StatusCode) -> ProviderErrorKind {
    match status.as_u16() {
        401 | 403 => ProviderErrorKind::Auth,
        404 => ProviderErrorKind::ModelNotFound,
        408 => ProviderErrorKind::Timeout,
        429 => ProviderErrorKind::Server,
        400..=499 => ProviderErrorKind::BadRequest,
        _ => ProviderErrorKind::Server,
    }
}

/// Map an HTTP error status to the provider error taxonomy, keeping a
/// truncated body snippet for diagnostics.
pub(crate) async fn error_from_response(
    provider: &str,
    response: reqwest::Response,
) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(MAX_API_ERROR_CHARS).collect();

    ProviderError::new(
        kind_for_status(status),
        format!("{provider} API error ({status}): {snippet}"),
    )
}

/// Map a reqwest transport-level failure.
pub(crate) fn error_from_reqwest(provider: &str, error: &reqwest::Error) -> ProviderError {
    let kind = if error.is_timeout() {
        ProviderErrorKind::Timeout
    } else if error.is_decode() {
        ProviderErrorKind::MalformedResponse
    } else {
        ProviderErrorKind::Transport
    };

    ProviderError::new(kind, format!("{provider} request failed: {error}"))
}
