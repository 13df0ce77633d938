// src/generate/backend.rs
//! Model backends: an OpenAI-compatible chat endpoint and a local Ollama server.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::credentials::Credentials;
use crate::error::PipelineError;
use crate::ingest::ensure_success;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const LOCAL_MAX_BATCH: usize = 5;

const USER_AGENT: &str = "prediction-question-generator/0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Closed set of model selections accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelChoice {
    #[default]
    #[serde(rename = "remote-v1", alias = "gpt4")]
    RemoteV1,
    #[serde(rename = "remote-v2", alias = "gpt3.5")]
    RemoteV2,
    #[serde(rename = "remote-v3", alias = "gpt4-turbo")]
    RemoteV3,
    #[serde(rename = "local", alias = "llama")]
    Local,
}

impl ModelChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelChoice::RemoteV1 => "remote-v1",
            ModelChoice::RemoteV2 => "remote-v2",
            ModelChoice::RemoteV3 => "remote-v3",
            ModelChoice::Local => "local",
        }
    }

    /// Provider-side model name.
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelChoice::RemoteV1 => "gpt-4",
            ModelChoice::RemoteV2 => "gpt-3.5-turbo",
            ModelChoice::RemoteV3 => "gpt-4-1106-preview",
            ModelChoice::Local => "llama3.2:3b",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, ModelChoice::Local)
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelChoice {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote-v1" | "gpt4" => Ok(ModelChoice::RemoteV1),
            "remote-v2" | "gpt3.5" => Ok(ModelChoice::RemoteV2),
            "remote-v3" | "gpt4-turbo" => Ok(ModelChoice::RemoteV3),
            "local" | "llama" => Ok(ModelChoice::Local),
            other => Err(PipelineError::config(format!("unknown model `{other}`"))),
        }
    }
}

/// One chat completion per call. Timeouts are applied by the caller.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn model_id(&self) -> &str;

    /// Whether several batches may be in flight against this backend at once.
    fn supports_concurrency(&self) -> bool;

    /// Largest number of questions one call should be asked for.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub type SharedBackend = Arc<dyn ModelBackend>;

fn http(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5).min(timeout))
        .timeout(timeout)
        .build()
        .context("building model http client")
}

/// Chat Completions API (OpenAI or a compatible gateway).
pub struct OpenAiChatBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http(timeout)?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            max_tokens: 4000,
            temperature: 0.7,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ModelBackend for OpenAiChatBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn supports_concurrency(&self) -> bool {
        true
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai http post()")?;
        let body: Resp = ensure_success(resp)
            .await?
            .json()
            .await
            .context("openai decode response")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            bail!("openai returned an empty completion");
        }
        Ok(content.trim().to_string())
    }
}

/// Local Ollama server, `/api/chat` without streaming.
pub struct OllamaBackend {
    http: reqwest::Client,
    host: String,
    model: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
}

const OLLAMA_OPTIONS: OllamaOptions = OllamaOptions {
    temperature: 0.8,
    top_p: 0.9,
    top_k: 40,
    repeat_penalty: 1.1,
};

impl OllamaBackend {
    pub fn new(host: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http(timeout)?,
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Reachability check; returns the server version.
    pub async fn server_version(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Version {
            version: String,
        }
        let resp = self
            .http
            .get(format!("{}/api/version", self.host))
            .send()
            .await
            .with_context(|| format!("ollama not reachable at {}", self.host))?;
        let v: Version = ensure_success(resp)
            .await?
            .json()
            .await
            .context("ollama decode version")?;
        Ok(v.version)
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn supports_concurrency(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(LOCAL_MAX_BATCH)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            stream: bool,
            options: OllamaOptions,
        }
        #[derive(Deserialize)]
        struct Resp {
            message: Msg,
        }
        #[derive(Deserialize)]
        struct Msg {
            #[serde(default)]
            content: String,
        }

        let resp = self
            .http
            .post(format!("{}/api/chat", self.host))
            .json(&Req {
                model: &self.model,
                messages,
                stream: false,
                options: OLLAMA_OPTIONS,
            })
            .send()
            .await
            .context("ollama http post()")?;
        let body: Resp = ensure_success(resp)
            .await?
            .json()
            .await
            .context("ollama decode response")?;
        if body.message.content.trim().is_empty() {
            bail!("ollama returned an empty completion");
        }
        Ok(body.message.content.trim().to_string())
    }
}

/// Factory: pick the backend for the configured model.
/// A remote model without an API key is a configuration error.
pub fn build_backend(
    choice: ModelChoice,
    creds: &Credentials,
    timeout: Duration,
) -> Result<SharedBackend, PipelineError> {
    if choice.is_remote() {
        let key = creds
            .openai_api_key
            .as_deref()
            .ok_or_else(|| PipelineError::config(format!("model {choice} needs OPENAI_API_KEY")))?;
        let backend = OpenAiChatBackend::new(key, choice.model_id(), timeout)
            .map_err(|e| PipelineError::config(format!("{e:#}")))?;
        tracing::info!(model = choice.model_id(), "using remote model backend");
        Ok(Arc::new(backend))
    } else {
        let host = creds.ollama_host.as_deref().unwrap_or(DEFAULT_OLLAMA_HOST);
        let backend = OllamaBackend::new(host, choice.model_id(), timeout)
            .map_err(|e| PipelineError::config(format!("{e:#}")))?;
        tracing::info!(model = choice.model_id(), host, "using local model backend");
        Ok(Arc::new(backend))
    }
}
