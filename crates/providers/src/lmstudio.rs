//! LM Studio exposes an OpenAI-compatible server without authentication.

use crate::openai::EmbeddingApiResponse;
use crate::{
    chat_body, first_choice, ChatApiResponse, CompletionRequest, CompletionResponse,
    EmbedResponse, EmbeddingProvider, LlmProvider, ProviderError,
};
use reqwest::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct LmStudioConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
}

#[derive(Clone)]
pub struct LmStudioProvider {
    client: Client,
    cfg: Arc<LmStudioConfig>,
}

impl LmStudioProvider {
    pub fn new(cfg: LmStudioConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for LmStudioProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        let body = serde_json::json!({
            "model": self.cfg.embedding_model,
            "input": texts,
        });
        let parsed: EmbeddingApiResponse = self
            .client
            .post(self.url("/v1/embeddings"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for LmStudioProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = chat_body(&self.cfg.chat_model, req);
        let parsed: ChatApiResponse = self
            .client
            .post(self.url("/v1/chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        first_choice(parsed, &self.cfg.chat_model, "lmstudio")
    }
}
