use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::framing::LineBuffer;
use super::http::build_provider_client;
use super::{
    EndpointConfig, GenerateRequest, ProviderAdapter, TokenEvent, TokenStream, TokenUsage,
    error_from_reqwest, error_from_response,
};
use crate::error::{ProviderError, ProviderErrorKind};

const PROVIDER_NAME: &str = "Ollama";

/// Adapter for an Ollama server: `/api/chat` with `stream: true`, response
/// framed as newline-delimited JSON chunks.
pub struct OllamaAdapter {
    base_url: String,
    /// Pre-computed `"Bearer <token>"` header value; most Ollama installs
    /// run without auth, reverse-proxied ones may require it.
    cached_auth_header: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    content: String,
}

impl OllamaAdapter {
    pub fn new(endpoint: &EndpointConfig) -> Self {
        Self {
            base_url: endpoint.url.as_str().trim_end_matches('/').to_string(),
            cached_auth_header: endpoint.api_key.as_deref().map(|key| format!("Bearer {key}")),
            client: build_provider_client(endpoint.request_timeout, endpoint.verify_tls),
        }
    }

    fn build_request<'a>(request: &GenerateRequest<'a>) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(Message {
                role: "system",
                content: request.system_prompt,
            });
        }
        messages.push(Message {
            role: "user",
            content: request.user_input,
        });

        ChatRequest {
            model: request.model_name,
            messages,
            stream: true,
            options: Options {
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                num_predict: request.params.max_tokens,
            },
        }
    }

    /// Ollama reports request-level failures as an in-band `error` chunk.
    fn in_band_error(message: &str) -> ProviderError {
        let kind = if message.contains("not found") {
            ProviderErrorKind::ModelNotFound
        } else {
            ProviderErrorKind::Server
        };
        ProviderError::new(kind, format!("{PROVIDER_NAME} error: {message}"))
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cached_auth_header {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<TokenStream, ProviderError> {
        let body = Self::build_request(&request);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .with_auth(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|error| error_from_reqwest(PROVIDER_NAME, &error))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER_NAME, response).await);
        }

        let mut byte_stream = response.bytes_stream();
        let stream = try_stream! {
            let mut lines = LineBuffer::new();
            let mut completed = false;

            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|error| error_from_reqwest(PROVIDER_NAME, &error))?;
                lines.push_chunk(&chunk);

                while let Some(line) = lines.next_line() {
                    if line.trim().is_empty() {
                        continue;
                    }

                    let Ok(parsed) = serde_json::from_str::<ChatChunk>(&line) else {
                        // A broken chunk must not abort the stream.
                        tracing::debug!(provider = PROVIDER_NAME, "Skipping unparseable chunk");
                        continue;
                    };

                    if let Some(message) = parsed.error {
                        Err(Self::in_band_error(&message))?;
                    }

                    if let Some(message) = parsed.message
                        && !message.content.is_empty()
                    {
                        yield TokenEvent::Delta {
                            text: message.content,
                        };
                    }

                    if parsed.done {
                        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
                            (Some(prompt_tokens), Some(completion_tokens)) => Some(TokenUsage {
                                prompt_tokens,
                                completion_tokens,
                            }),
                            _ => None,
                        };
                        yield TokenEvent::Completed { usage };
                        completed = true;
                        break 'read;
                    }
                }
            }

            if !completed {
                Err(ProviderError::malformed(format!(
                    "{PROVIDER_NAME} stream ended without a done chunk"
                )))?;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn probe(&self, _model_name: &str) -> Result<(), ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|error| error_from_reqwest(PROVIDER_NAME, &error))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER_NAME, response).await);
        }
        Ok(())
    }
}
