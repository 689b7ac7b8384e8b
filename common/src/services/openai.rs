use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::AppError,
    services::{ChatModel, EmbeddingService},
    utils::config::AppConfig,
};

/// Chat-model adapter over an OpenAI-compatible completion endpoint.
pub struct OpenAiChatModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone())
            .with_api_base(config.openai_base_url.clone());
        Self {
            client: Arc::new(Client::with_config(openai_config)),
            model: config.chat_model.clone(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_prompt.to_owned()).into(),
                ChatCompletionRequestUserMessage::from(user_message.to_owned()).into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
    }
}

/// Embedding adapter over an OpenAI-compatible embedding endpoint.
pub struct OpenAiEmbedder {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    dimensions: u32,
}

impl OpenAiEmbedder {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            client,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .dimensions(self.dimensions)
            .input([text])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .first()
            .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?
            .embedding
            .clone();

        debug!(dimensions = embedding.len(), "Generated query embedding");

        Ok(embedding)
    }
}
