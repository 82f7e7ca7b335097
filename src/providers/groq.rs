use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::LLMError,
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage},
};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama3-70b-8192";

#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl GroqConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Client for Groq's OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct Groq {
    client: Client,
    config: GroqConfig,
}

impl Groq {
    pub fn new(api_key: impl Into<String>) -> Result<Self, LLMError> {
        Self::from_config(GroqConfig::new(api_key))
    }

    pub fn from_env() -> Result<Self, LLMError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LLMError> {
        let api_key = lookup("GROQ_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(LLMError::MissingApiKey("GROQ_API_KEY"))?;
        let mut config = GroqConfig::new(api_key);

        if let Some(base_url) = lookup("GROQ_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(timeout_ms) = lookup("GROQ_REQUEST_TIMEOUT_MS") {
            let ms = timeout_ms.trim().parse::<u64>().map_err(|err| {
                LLMError::Provider(format!(
                    "invalid value {timeout_ms:?} for GROQ_REQUEST_TIMEOUT_MS: {err}"
                ))
            })?;
            config.request_timeout = Duration::from_millis(ms);
        }

        Self::from_config(config)
    }

    pub fn from_config(config: GroqConfig) -> Result<Self, LLMError> {
        if config.api_key.trim().is_empty() {
            return Err(LLMError::MissingApiKey("GROQ_API_KEY"));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GroqConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        join_endpoint(&self.config.base_url, path)
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }
}

#[derive(Debug, Serialize)]
struct GroqRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct GroqErrorEnvelope {
    error: GroqError,
}

#[derive(Debug, Deserialize)]
struct GroqError {
    message: String,
}

#[async_trait]
impl LLMProvider for Groq {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let CompletionRequest {
            model,
            messages,
            temperature,
        } = request;

        debug!(%model, messages = messages.len(), "sending chat completion");

        let body = GroqRequestBody {
            model,
            messages,
            temperature,
        };

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("chat/completions")))
            .json(&body);

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                LLMError::Timeout
            } else {
                LLMError::Http(err)
            }
        })?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            return Err(status_error(status, &text));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LLMError::InvalidResponse("response did not contain any choices"))?;

        Ok(CompletionResponse {
            message: choice.message,
            usage: parsed.usage,
        })
    }

    fn name(&self) -> &'static str {
        "groq"
    }
}

fn join_endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn status_error(status: StatusCode, body: &str) -> LLMError {
    let message = match serde_json::from_str::<GroqErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.to_string(),
    };

    LLMError::Status {
        status: status.as_u16(),
        message,
    }
}
