use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::errors::LlmError;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for the repair LLM
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            max_tokens: 800,
            // Repairs should be as literal as possible
            temperature: 0.0,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("REPAIR_LLM_ENABLED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(defaults.enabled),
            provider: std::env::var("REPAIR_LLM_PROVIDER").unwrap_or(defaults.provider),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: std::env::var("REPAIR_LLM_MODEL").unwrap_or(defaults.model),
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_completion(&self, system: &str, prompt: String) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize, Clone)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// OpenAI-compatible chat completion provider
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: usize,
    temperature: f32,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }

    async fn call_openai_with_retry(&self, request: OpenAiRequest) -> Result<OpenAiResponse, LlmError> {
        let mut retry_count = 0;
        let max_retries = 3;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.call_openai(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    retry_count += 1;
                    if retry_count >= max_retries {
                        error!("OpenAI API call failed after {} retries: {}", max_retries, e);
                        return Err(e);
                    }

                    warn!(
                        "OpenAI API call failed (attempt {}/{}): {}. Retrying in {:?}...",
                        retry_count, max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn call_openai(&self, request: &OpenAiRequest) -> Result<OpenAiResponse, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 429 {
            return Err(LlmError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("HTTP {}: {}", status, error_text)));
        }

        response
            .json::<OpenAiResponse>()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate_completion(&self, system: &str, prompt: String) -> Result<String, LlmError> {
        info!("Generating LLM completion (model: {}, max_tokens: {})", self.model, self.max_tokens);

        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAiMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                OpenAiMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self.call_openai_with_retry(request).await?;

        let content = response
            .choices
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?
            .message
            .content
            .clone();

        if let Some(usage) = response.usage {
            info!(
                "LLM completion generated. Tokens: {} prompt + {} completion = {} total",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        Ok(content)
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    content: String,
    created_at: Instant,
}

/// LLM response cache with TTL
pub struct LlmCache {
    cache: Arc<RwLock<HashMap<String, CachedResponse>>>,
    ttl: Duration,
}

impl LlmCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|cached| cached.created_at.elapsed() < self.ttl)
            .map(|cached| cached.content.clone())
    }

    pub async fn set(&self, key: String, value: String) {
        let mut cache = self.cache.write().await;
        // Expired entries are swept on write so the map stays bounded
        cache.retain(|_, v| v.created_at.elapsed() < self.ttl);
        cache.insert(
            key,
            CachedResponse {
                content: value,
                created_at: Instant::now(),
            },
        );
    }
}

const REPAIR_SYSTEM_PROMPT: &str = "You convert analyst write-ups into strict JSON. \
Reply with a single JSON object that matches the requested schema and nothing else.";

/// Secondary model used to coerce malformed analysis output into JSON.
pub struct LlmService {
    provider: Option<Arc<dyn LlmProvider>>,
    cache: LlmCache,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        let provider = if !config.enabled {
            info!("Repair LLM is disabled in configuration");
            None
        } else {
            match (config.provider.as_str(), config.api_key.as_deref()) {
                (_, None) | (_, Some("")) => {
                    warn!("OPENAI_API_KEY not configured. Repair LLM disabled.");
                    None
                }
                ("openai", Some(key)) => match OpenAiProvider::new(&config, key.to_string()) {
                    Ok(provider) => {
                        info!("🤖 Repair LLM enabled (model: {})", config.model);
                        Some(Arc::new(provider) as Arc<dyn LlmProvider>)
                    }
                    Err(e) => {
                        warn!("Failed to build repair LLM client: {}. Repair LLM disabled.", e);
                        None
                    }
                },
                (other, _) => {
                    warn!("Unknown LLM provider: {}. Repair LLM disabled.", other);
                    None
                }
            }
        };

        Self::from_parts(provider)
    }

    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self::from_parts(Some(provider))
    }

    fn from_parts(provider: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            provider,
            cache: LlmCache::new(Duration::from_secs(3600)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Ask the model to restructure `prompt`. Identical prompts are served
    /// from cache.
    pub async fn repair(&self, prompt: String) -> Result<String, LlmError> {
        let provider = self.provider.as_ref().ok_or(LlmError::Disabled)?;

        let cache_key = format!("repair:{}", Self::hash_prompt(&prompt));
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let result = provider.generate_completion(REPAIR_SYSTEM_PROMPT, prompt).await?;
        self.cache.set(cache_key, result.clone()).await;
        Ok(result)
    }

    fn hash_prompt(prompt: &str) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}
