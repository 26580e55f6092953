use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::{
    EndpointConfig, GenerateRequest, GenerationParams, ProviderAdapter, ProviderKind, TokenEvent,
    TokenUsage, build_adapter,
};
use crate::error::{ProviderError, ProviderErrorKind, StreamError};

/// Which of a provider's two endpoints served (or failed) a call.
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
pub enum EndpointRole {
    Primary,
    Fallback,
}

/// Receives text fragments as they arrive from the backend. `Err` means the
/// consumer is gone and the run should cancel.
#[async_trait]
pub trait TokenSink: Send {
    async fn accept(&mut self, text: &str) -> Result<(), StreamError>;
}

/// Terminal outcome of a failed invocation: the last error kind and the
/// endpoint that produced it, for diagnostics and the per-criterion record.
#[derive(Debug)]
pub enum FailoverError {
    Provider {
        kind: ProviderErrorKind,
        endpoint: EndpointRole,
        message: String,
    },
    /// The sink rejected a delta — the client disconnected.
    Cancelled,
}

/// A completed generation: full text, reported usage, serving endpoint.
#[derive(Debug)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub served_by: EndpointRole,
}

/// Inputs for building an invoker from one provider's settings.
pub struct FailoverSpec {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub primary: EndpointConfig,
    pub fallback: Option<EndpointConfig>,
    pub fallback_enabled: bool,
    pub params: GenerationParams,
}

struct AttemptTarget {
    adapter: Box<dyn ProviderAdapter>,
    api_key: Option<String>,
}

enum AttemptFailure {
    Provider(ProviderError),
    Cancelled,
}

/// Wraps one provider's adapter pair with the primary/fallback policy:
/// `Idle → AttemptingPrimary → {Success | AttemptingFallback} → {Success |
/// Failed}`. Routing is decided fresh on every invocation.
pub struct FailoverInvoker {
    provider_id: String,
    request_timeout: Duration,
    params: GenerationParams,
    primary: AttemptTarget,
    fallback: Option<AttemptTarget>,
    fallback_enabled: bool,
}

impl FailoverInvoker {
    pub fn new(spec: FailoverSpec) -> Self {
        let FailoverSpec {
            provider_id,
            kind,
            primary,
            fallback,
            fallback_enabled,
            params,
        } = spec;

        let fallback = fallback.filter(|candidate| {
            if candidate.url == primary.url {
                tracing::warn!(
                    provider = %provider_id,
                    "Fallback endpoint equals primary, ignoring it"
                );
                false
            } else {
                true
            }
        });

        Self {
            request_timeout: primary.request_timeout,
            primary: AttemptTarget {
                api_key: primary.api_key.clone(),
                adapter: build_adapter(kind, &primary),
            },
            fallback: fallback.map(|endpoint| AttemptTarget {
                api_key: endpoint.api_key.clone(),
                adapter: build_adapter(kind, &endpoint),
            }),
            provider_id,
            params,
            fallback_enabled,
        }
    }

    /// Assemble an invoker from pre-built adapters. Intended for callers
    /// that bring their own [`ProviderAdapter`] implementations.
    pub fn from_adapters(
        provider_id: impl Into<String>,
        primary: Box<dyn ProviderAdapter>,
        primary_api_key: Option<String>,
        fallback: Option<(Box<dyn ProviderAdapter>, Option<String>)>,
        fallback_enabled: bool,
        request_timeout: Duration,
        params: GenerationParams,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            request_timeout,
            params,
            primary: AttemptTarget {
                adapter: primary,
                api_key: primary_api_key,
            },
            fallback: fallback.map(|(adapter, api_key)| AttemptTarget { adapter, api_key }),
            fallback_enabled,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Run one generation with failover. Deltas are forwarded into `sink`
    /// as they arrive; the accumulated text of the winning attempt comes
    /// back in the [`Generation`].
    pub async fn invoke(
        &self,
        model_name: &str,
        system_prompt: &str,
        user_input: &str,
        sink: &mut dyn TokenSink,
    ) -> Result<Generation, FailoverError> {
        let request = GenerateRequest {
            model_name,
            system_prompt,
            user_input,
            params: self.params,
        };

        let mut emitted = 0usize;
        let primary_error = match self.attempt(&self.primary, request, sink, &mut emitted).await {
            Ok((text, usage)) => {
                return Ok(Generation {
                    text,
                    usage,
                    served_by: EndpointRole::Primary,
                });
            }
            Err(AttemptFailure::Cancelled) => return Err(FailoverError::Cancelled),
            Err(AttemptFailure::Provider(error)) => error,
        };

        let take_fallback = self
            .fallback
            .as_ref()
            .filter(|target| {
                fallback_permitted(
                    primary_error.kind,
                    self.fallback_enabled,
                    emitted,
                    target.api_key != self.primary.api_key,
                )
            });

        let Some(fallback) = take_fallback else {
            tracing::warn!(
                provider = %self.provider_id,
                endpoint = %EndpointRole::Primary,
                error = %primary_error,
                "Provider call failed, fallback not taken"
            );
            return Err(FailoverError::Provider {
                kind: primary_error.kind,
                endpoint: EndpointRole::Primary,
                message: primary_error.message,
            });
        };

        tracing::warn!(
            provider = %self.provider_id,
            error = %primary_error,
            "Primary endpoint failed, switching to fallback"
        );

        let mut fallback_emitted = 0usize;
        match self
            .attempt(fallback, request, sink, &mut fallback_emitted)
            .await
        {
            Ok((text, usage)) => {
                tracing::info!(
                    provider = %self.provider_id,
                    "Fallback endpoint recovered the call"
                );
                Ok(Generation {
                    text,
                    usage,
                    served_by: EndpointRole::Fallback,
                })
            }
            Err(AttemptFailure::Cancelled) => Err(FailoverError::Cancelled),
            Err(AttemptFailure::Provider(error)) => Err(FailoverError::Provider {
                kind: error.kind,
                endpoint: EndpointRole::Fallback,
                message: error.message,
            }),
        }
    }

    async fn attempt(
        &self,
        target: &AttemptTarget,
        request: GenerateRequest<'_>,
        sink: &mut dyn TokenSink,
        emitted: &mut usize,
    ) -> Result<(String, Option<TokenUsage>), AttemptFailure> {
        let work = async {
            let mut stream = target
                .adapter
                .generate(request)
                .await
                .map_err(AttemptFailure::Provider)?;

            let mut text = String::new();
            while let Some(event) = stream.next().await {
                match event.map_err(AttemptFailure::Provider)? {
                    TokenEvent::Delta { text: delta } => {
                        sink.accept(&delta)
                            .await
                            .map_err(|_| AttemptFailure::Cancelled)?;
                        *emitted += 1;
                        text.push_str(&delta);
                    }
                    TokenEvent::Completed { usage } => return Ok((text, usage)),
                }
            }

            Err(AttemptFailure::Provider(ProviderError::malformed(
                "stream ended without completion",
            )))
        };

        match tokio::time::timeout(self.request_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AttemptFailure::Provider(ProviderError::new(
                ProviderErrorKind::Timeout,
                format!("no response within {}s", self.request_timeout.as_secs()),
            ))),
        }
    }
}

/// The fallback routing decision. Only specific primary failures reroute:
/// timeouts, transport faults and server errors always; auth failures only
/// when the fallback carries a different credential. Request-shaped errors
/// (`ModelNotFound`, `BadRequest`, `MalformedResponse`) never do. Once any
/// output has been forwarded downstream a retry would duplicate text, so an
/// attempt that already emitted is terminal.
pub fn fallback_permitted(
    kind: ProviderErrorKind,
    fallback_enabled: bool,
    emitted_deltas: usize,
    credentials_differ: bool,
) -> bool {
    if !fallback_enabled || emitted_deltas > 0 {
        return false;
    }

    match kind {
        ProviderErrorKind::Timeout
        | ProviderErrorKind::Transport
        | ProviderErrorKind::Server => true,
        ProviderErrorKind::Auth => credentials_differ,
        ProviderErrorKind::ModelNotFound
        | ProviderErrorKind::BadRequest
        | ProviderErrorKind::MalformedResponse => false,
    }
}
