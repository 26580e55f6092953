use async_trait::async_trait;
use reqwest::Client;

use super::chat_completions::{ChatRequest, ChatResponse, build_messages, probe_messages, sse_token_stream};
use super::http::build_provider_client;
use super::{
    EndpointConfig, GenerateRequest, ProviderAdapter, TokenStream, error_from_reqwest,
    error_from_response,
};
use crate::error::{ProviderError, ProviderErrorKind};

const PROVIDER_NAME: &str = "Azure OpenAI";
const DEFAULT_API_VERSION: &str = "2024-12-01-preview";

/// Adapter for an Azure OpenAI resource. The model name doubles as the
/// deployment name and is scoped into the path; the credential travels in
/// the `api-key` header rather than a bearer token.
pub struct AzureOpenAiAdapter {
    base_url: String,
    api_key: Option<String>,
    api_version: String,
    client: Client,
}

impl AzureOpenAiAdapter {
    pub fn new(endpoint: &EndpointConfig) -> Self {
        Self {
            base_url: endpoint.url.as_str().trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            api_version: endpoint
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            client: build_provider_client(endpoint.request_timeout, endpoint.verify_tls),
        }
    }

    fn completions_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url, deployment, self.api_version
        )
    }

    async fn send(
        &self,
        deployment: &str,
        body: &ChatRequest<'_>,
    ) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Auth,
                format!("{PROVIDER_NAME} api key not configured"),
            )
        })?;

        let response = self
            .client
            .post(self.completions_url(deployment))
            .header("api-key", api_key)
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
impl ProviderAdapter for AzureOpenAiAdapter {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<TokenStream, ProviderError> {
        let body = ChatRequest {
            model: None,
            messages: build_messages(&request),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
            stream: true,
        };

        let response = self.send(request.model_name, &body).await?;
        Ok(sse_token_stream(PROVIDER_NAME, response))
    }

    async fn probe(&self, model_name: &str) -> Result<(), ProviderError> {
        let body = ChatRequest {
            model: None,
            messages: probe_messages(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: Some(1),
            stream: false,
        };

        let response = self.send(model_name, &body).await?;
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
