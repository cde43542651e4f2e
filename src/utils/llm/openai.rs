use anyhow::{anyhow, Result};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

use crate::utils::llm::{ChatMessage, History, HistoryEntry, LanguageModel, LmConfig, LmRequest, LmResponse, ResponseCache, Role, Usage};

/// Chat model served by the OpenAI chat completion API or a compatible server.
///
/// The API key is read by the client from `OPENAI_API_KEY`.
#[derive(Clone)]
pub struct OpenAiChat {
    pub client: Client<OpenAIConfig>,
    config: LmConfig,
    history: Arc<History>,
    cache: Arc<ResponseCache>,
}

impl OpenAiChat {
    pub fn new(config: LmConfig) -> Self {
        let mut openai_config = OpenAIConfig::default();
        if let Some(api_base) = &config.api_base {
            openai_config = openai_config.with_api_base(api_base.as_str().trim_end_matches('/'));
        }
        info!("using language model {}", config.model);
        Self {
            client: Client::with_config(openai_config),
            config,
            history: Arc::new(History::default()),
            cache: Arc::new(ResponseCache::default()),
        }
    }

    /// Build a model from [LmConfig::from_env].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(LmConfig::from_env()?))
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// The model id sent over the wire, without the `openai/` provider prefix.
    pub fn api_model_id(&self) -> &str {
        api_model_id(&self.config.model)
    }

    fn to_openai_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        let content = message.content.as_str();
        let message: ChatCompletionRequestMessage = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default().content(content).build()?.into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default().content(content).build()?.into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default().content(content).build()?.into(),
        };
        Ok(message)
    }

    async fn request_completion(&self, request: &LmRequest) -> Result<LmResponse> {
        let messages = request.messages.iter()
            .map(Self::to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.api_model_id()).messages(messages);
        if let Some(temperature) = request.temperature.or(self.config.temperature) {
            args.temperature(temperature);
        }
        let response = self.client.chat().create(args.build()?).await?;
        let usage = response.usage.as_ref().map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });
        let text = response.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("model {} returned no content", self.config.model))?;
        Ok(LmResponse { text, usage, cached: false })
    }
}

fn api_model_id(model: &str) -> &str {
    model.strip_prefix("openai/").unwrap_or(model)
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &LmRequest) -> Result<LmResponse> {
        let cache_key = if self.config.cache {
            Some(ResponseCache::key(&self.config.model, request)?)
        } else {
            None
        };
        let cached = cache_key.as_deref().and_then(|key| self.cache.get(key));
        let response = match cached {
            Some(mut response) => {
                debug!("cache hit for {}", self.config.model);
                response.cached = true;
                response
            }
            None => {
                let response = self.request_completion(request).await?;
                if let Some(key) = cache_key {
                    self.cache.insert(key, response.clone());
                }
                response
            }
        };
        self.history.record(HistoryEntry {
            model: self.config.model.clone(),
            request: request.clone(),
            response: response.clone(),
        });
        Ok(response)
    }

    fn inspect_history(&self, n: usize) -> String {
        self.history.render(n)
    }
}
