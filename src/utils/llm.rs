//! # LLM endpoints
//!
//! The endpoint of every [Program](crate::program::Program) call is a [LanguageModel], which consumes
//! chat messages and produces a reply.
//!
//! * [openai::OpenAiChat] talks to the OpenAI chat completion API (or any compatible server).
//! * [FnLm] wraps a closure, which is handy for offline runs and tests.
//!
//! Both keep a [History] of calls, which can be rendered with [LanguageModel::inspect_history].

pub mod openai;

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fmt::Formatter;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

pub use openai::OpenAiChat;

/// Model used when `OPENAI_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "openai/gpt-5-nano";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A single call to a language model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LmRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the model's configured temperature.
    pub temperature: Option<f32>,
    /// Distinguishes otherwise identical requests so that they are not served from the cache.
    pub rollout_id: Option<u64>,
}

impl LmRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, ..Default::default() }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_rollout_id(mut self, rollout_id: u64) -> Self {
        self.rollout_id = Some(rollout_id);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmResponse {
    pub text: String,
    pub usage: Option<Usage>,
    /// Whether the reply came from the response cache.
    pub cached: bool,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// The model id, as configured (e.g. `openai/gpt-5-nano`).
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &LmRequest) -> Result<LmResponse>;

    /// Render the last `n` calls made through this model.
    fn inspect_history(&self, _n: usize) -> String {
        String::new()
    }
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn complete(&self, request: &LmRequest) -> Result<LmResponse> {
        (**self).complete(request).await
    }

    fn inspect_history(&self, n: usize) -> String {
        (**self).inspect_history(n)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // entries are pushed whole, so a poisoned lock still guards consistent data
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub model: String,
    pub request: LmRequest,
    pub response: LmResponse,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]{}", self.model, if self.response.cached { " (cached)" } else { "" })?;
        for message in &self.request.messages {
            writeln!(f, "\n{} message:\n\n{}", message.role, message.content)?;
        }
        writeln!(f, "\nResponse:\n\n{}", self.response.text)?;
        if let Some(usage) = self.response.usage {
            writeln!(f, "\n(prompt tokens: {}, completion tokens: {})", usage.prompt_tokens, usage.completion_tokens)?;
        }
        Ok(())
    }
}

/// Append-only log of model calls.
#[derive(Debug, Default)]
pub struct History {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl History {
    pub fn record(&self, entry: HistoryEntry) {
        lock(&self.entries).push(entry);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last `n` entries, oldest first.
    pub fn last(&self, n: usize) -> Vec<HistoryEntry> {
        let entries = lock(&self.entries);
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    pub fn render(&self, n: usize) -> String {
        self.last(n)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// In-memory reply cache keyed by model id and the full request.
#[derive(Debug, Default)]
pub struct ResponseCache {
    replies: Mutex<HashMap<String, LmResponse>>,
}

impl ResponseCache {
    pub fn key(model: &str, request: &LmRequest) -> Result<String> {
        Ok(format!("{}\u{0}{}", model, serde_json::to_string(request)?))
    }

    pub fn get(&self, key: &str) -> Option<LmResponse> {
        lock(&self.replies).get(key).cloned()
    }

    pub fn insert(&self, key: String, response: LmResponse) {
        lock(&self.replies).insert(key, response);
    }
}

/// Configuration of a chat model, usually read from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    /// Provider-qualified model id, e.g. `openai/gpt-5-nano`.
    pub model: String,
    pub api_base: Option<Url>,
    pub temperature: Option<f32>,
    pub cache: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: None,
            temperature: None,
            cache: true,
        }
    }
}

impl LmConfig {
    pub const MODEL_ENV: &'static str = "OPENAI_MODEL";
    pub const API_BASE_ENV: &'static str = "OPENAI_BASE_URL";
    pub const TEMPERATURE_ENV: &'static str = "DECLPROMPT_TEMPERATURE";
    pub const CACHE_ENV: &'static str = "DECLPROMPT_CACHE";

    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Default::default() }
    }

    /// Read the configuration from environment variables, falling back to defaults.
    ///
    /// The API key is not part of the config: the OpenAI client reads `OPENAI_API_KEY` itself.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(model) = non_empty(Self::MODEL_ENV) {
            config.model = model.trim().to_string();
        }
        if let Some(base) = non_empty(Self::API_BASE_ENV) {
            let url = Url::parse(base.trim()).with_context(|| format!("{} is not a valid URL: {}", Self::API_BASE_ENV, base))?;
            config.api_base = Some(url);
        }
        if let Some(temperature) = non_empty(Self::TEMPERATURE_ENV) {
            let temperature: f32 = temperature.trim().parse()
                .with_context(|| format!("{} must be a number, got {}", Self::TEMPERATURE_ENV, temperature))?;
            config.temperature = Some(temperature);
        }
        if let Some(cache) = non_empty(Self::CACHE_ENV) {
            config.cache = !matches!(cache.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
        }
        debug!("language model config: {:?}", config);
        Ok(config)
    }
}

type ReplyFn = dyn Fn(&LmRequest) -> Result<String> + Send + Sync;

/// A [LanguageModel] backed by a closure. Replies are recorded in the history like a real model.
///
/// ```
/// use declprompt::utils::llm::{FnLm, LanguageModel, LmRequest, ChatMessage};
/// let lm = FnLm::new("echo", |request: &LmRequest| Ok(request.messages.last().unwrap().content.clone()));
/// let reply = futures::executor::block_on(lm.complete(&LmRequest::new(vec![ChatMessage::user("hi")]))).unwrap();
/// assert_eq!(reply.text, "hi");
/// ```
#[derive(Clone)]
pub struct FnLm {
    name: String,
    reply: Arc<ReplyFn>,
    history: Arc<History>,
}

impl FnLm {
    pub fn new(name: impl Into<String>, reply: impl Fn(&LmRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            reply: Arc::new(reply),
            history: Arc::new(History::default()),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }
}

#[async_trait]
impl LanguageModel for FnLm {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LmRequest) -> Result<LmResponse> {
        let text = (self.reply)(request)?;
        let response = LmResponse { text, usage: None, cached: false };
        self.history.record(HistoryEntry {
            model: self.name.clone(),
            request: request.clone(),
            response: response.clone(),
        });
        Ok(response)
    }

    fn inspect_history(&self, n: usize) -> String {
        self.history.render(n)
    }
}
