//! Request/response shapes shared by the two chat-completions dialects
//! (Azure AI inference and Azure OpenAI), plus the SSE-to-delta mapping.

use async_stream::try_stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::framing::{SseBuffer, data_lines};
use super::{GenerateRequest, TokenEvent, TokenStream, TokenUsage, error_from_reqwest};
use crate::error::ProviderError;

#[derive(Debug, Serialize)]
pub(super) struct ChatRequest<'a> {
    /// Azure AI names the model in the body; Azure OpenAI scopes it into the
    /// deployment path instead and omits the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: Vec<Message<'a>>,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct Message<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

pub(super) fn build_messages<'a>(request: &GenerateRequest<'a>) -> Vec<Message<'a>> {
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
    messages
}

pub(super) fn probe_messages() -> Vec<Message<'static>> {
    vec![
        Message {
            role: "system",
            content: "You are a health check. Reply with 'ok'.",
        },
        Message {
            role: "user",
            content: "ping",
        },
    ]
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Non-streaming response body, used by the probe path.
#[derive(Debug, Deserialize)]
pub(super) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResponseMessage {
    pub content: Option<String>,
}

/// Translate an SSE chat-completions body into the uniform delta sequence.
///
/// Individual unparseable chunks are skipped; a body that ends without
/// `[DONE]` or a finish reason is malformed. Usage arrives in whichever
/// chunk the service puts it in, typically the last one before the sentinel.
pub(super) fn sse_token_stream(provider: &'static str, response: reqwest::Response) -> TokenStream {
    let mut byte_stream = response.bytes_stream();

    let stream = try_stream! {
        let mut sse = SseBuffer::new();
        let mut usage: Option<TokenUsage> = None;
        let mut finished = false;
        let mut done = false;

        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|error| error_from_reqwest(provider, &error))?;
            sse.push_chunk(&chunk);

            while let Some(block) = sse.next_event_block() {
                for data in data_lines(&block) {
                    if data == "[DONE]" {
                        done = true;
                        break 'read;
                    }

                    let Ok(parsed) = serde_json::from_str::<ChatChunk>(data) else {
                        tracing::debug!(provider, "Skipping unparseable stream chunk");
                        continue;
                    };

                    if let Some(reported) = parsed.usage {
                        usage = Some(TokenUsage {
                            prompt_tokens: reported.prompt_tokens,
                            completion_tokens: reported.completion_tokens,
                        });
                    }

                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content
                            && !content.is_empty()
                        {
                            yield TokenEvent::Delta { text: content };
                        }
                        if choice.finish_reason.is_some() {
                            finished = true;
                        }
                    }
                }
            }
        }

        if done || finished {
            yield TokenEvent::Completed { usage };
        } else {
            Err(ProviderError::malformed(format!(
                "{provider} stream ended without completion"
            )))?;
        }
    };

    Box::pin(stream)
}
