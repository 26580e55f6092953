use async_trait::async_trait;
use reqwest::Client;

use super::chat_completions::{ChatRequest, ChatResponse, build_messages, probe_messages, sse_token_stream};
use super::http::build_provider_client;
use super::{
    EndpointConfig, GenerateRequest, ProviderAdapter, TokenStream, error_from_reqwest,
    error_from_response,
};
use crate::error::{ProviderError, ProviderErrorKind};

const PROVIDER_NAME: &str = "Azure AI";
const DEFAULT_API_VERSION: &str = "2024-05-01-preview";

/// Adapter for an Azure AI inference endpoint: `/chat/completions` with an
/// `api-version` query, bearer credential, SSE response framing.
pub struct AzureAiAdapter {
    base_url: String,
    cached_auth_header: Option<String>,
    api_version: String,
    client: Client,
}

impl AzureAiAdapter {
    pub fn new(endpoint: &EndpointConfig) -> Self {
        Self {
            base_url: endpoint.url.as_str().trim_end_matches('/').to_string(),
            cached_auth_header: endpoint.api_key.as_deref().map(|key| format!("Bearer {key}")),
            api_version: endpoint
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            client: build_provider_client(endpoint.request_timeout, endpoint.verify_tls),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions?api-version={}",
            self.base_url, self.api_version
        )
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        let auth_header = self.cached_auth_header.as_ref().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Auth,
                format!("{PROVIDER_NAME} api key not configured"),
            )
        })?;

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", auth_header)
            .json(body)
            .send()
            .await
            .map_err(|error| error_from_reqwest(PROVIDER_NAME, &error))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER_NAME, response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for AzureAiAdapter {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<TokenStream, ProviderError> {
        let body = ChatRequest {
            model: Some(request.model_name),
            messages: build_messages(&request),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
            stream: true,
        };

        let response = self.send(&body).await?;
        Ok(sse_token_stream(PROVIDER_NAME, response))
    }

    async fn probe(&self, model_name: &str) -> Result<(), ProviderError> {
        let body = ChatRequest {
            model: Some(model_name),
            messages: probe_messages(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: Some(1),
            stream: false,
        };

        let response = self.send(&body).await?;
        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|error| error_from_reqwest(PROVIDER_NAME, &error))?;
        let content = reply
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default();
        tracing::debug!(provider = PROVIDER_NAME, reply = content, "Probe succeeded");
        Ok(())
    }
}
