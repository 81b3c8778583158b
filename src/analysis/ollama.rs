//! Ollama-backed analysis executor.
//!
//! Sends the rendered template prompt to Ollama's chat API and honors the
//! template's timeout, retry and cache settings.

use crate::analysis::executor::{AnalysisExecutor, AnalysisOutcome, AnalysisRequest};
use crate::analysis::template::{AptTemplate, OutputFormat};
use crate::error::AnalysisError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Clone)]
struct CachedReply {
    output: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedReply {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Executor that calls a local or remote Ollama server.
pub struct OllamaExecutor {
    http_client: reqwest::Client,
    ollama_url: String,
    /// Use this model instead of each template's preference.
    model_override: Option<String>,
    cache: Mutex<HashMap<String, CachedReply>>,
}

impl OllamaExecutor {
    pub fn new(ollama_url: &str, model_override: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        info!("Analysis executor using Ollama at {}", ollama_url);

        Ok(Self {
            http_client,
            ollama_url: ollama_url.trim_end_matches('/').to_string(),
            model_override,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn model_for<'a>(&'a self, template: &'a AptTemplate) -> &'a str {
        self.model_override
            .as_deref()
            .unwrap_or(&template.preferred_model)
    }

    async fn cached(&self, key: &str) -> Option<Value> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(reply) if reply.is_fresh() => Some(reply.output.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a reply, dropping every expired entry first.
    async fn store(&self, key: String, output: Value, ttl: Duration) {
        let mut cache = self.cache.lock().await;
        cache.retain(|_, reply| reply.is_fresh());
        cache.insert(
            key,
            CachedReply {
                output,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    async fn send_prompt(
        &self,
        template: &AptTemplate,
        prompt: &str,
    ) -> Result<String, AnalysisError> {
        let url = format!("{}/api/chat", self.ollama_url);

        let request = OllamaChatRequest {
            model: self.model_for(template).to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: ANALYSIS_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: template.temperature,
                num_predict: template.max_tokens,
            },
            format: (template.output_format == OutputFormat::Json).then(|| "json".to_string()),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AnalysisError::Backend(format!(
                        "Cannot connect to Ollama at {}",
                        self.ollama_url
                    ))
                } else {
                    AnalysisError::Backend(format!("Failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Backend(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Backend(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl AnalysisExecutor for OllamaExecutor {
    async fn execute(
        &self,
        template: &AptTemplate,
        request: &AnalysisRequest,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let prompt = template.render(&request.variables)?;
        let cache_key = format!("{}\u{0}{}\u{0}{}", template.id, self.model_for(template), prompt);
        let ttl = Duration::from_millis(template.cache_ttl_ms);

        if template.cacheable {
            if let Some(output) = self.cached(&cache_key).await {
                debug!("Analysis cache hit for '{}'", template.id);
                return Ok(AnalysisOutcome {
                    output,
                    cache_hit: true,
                    retries: 0,
                });
            }
        }

        let timeout = Duration::from_millis(template.timeout_ms);
        let mut last_error = AnalysisError::Backend("no attempt made".to_string());

        for attempt in 0..=template.retry_attempts {
            if attempt > 0 {
                debug!(
                    "Retrying analysis '{}' (attempt {}/{})",
                    template.id,
                    attempt + 1,
                    template.retry_attempts + 1
                );
            }

            let reply = match tokio::time::timeout(timeout, self.send_prompt(template, &prompt)).await
            {
                Ok(Ok(content)) => parse_output(template, &content),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AnalysisError::Timeout {
                    template_id: template.id.clone(),
                    timeout_ms: template.timeout_ms,
                }),
            };

            match reply {
                Ok(output) => {
                    if template.cacheable {
                        self.store(cache_key, output.clone(), ttl).await;
                    }
                    return Ok(AnalysisOutcome {
                        output,
                        cache_hit: false,
                        retries: attempt,
                    });
                }
                Err(e) => {
                    warn!("Analysis '{}' attempt {} failed: {}", template.id, attempt + 1, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Interpret the model's reply according to the template's output format.
pub fn parse_output(template: &AptTemplate, content: &str) -> Result<Value, AnalysisError> {
    match template.output_format {
        OutputFormat::Text | OutputFormat::Markdown => Ok(Value::String(content.to_string())),
        OutputFormat::Json => {
            let trimmed = content.trim();
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return Ok(value);
            }

            // Models often wrap JSON in prose or code fences.
            let start = trimmed.find('{');
            let end = trimmed.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&trimmed[start..=end]).map_err(|e| {
                        AnalysisError::InvalidOutput {
                            template_id: template.id.clone(),
                            reason: e.to_string(),
                        }
                    })
                }
                _ => Err(AnalysisError::InvalidOutput {
                    template_id: template.id.clone(),
                    reason: "no JSON object in reply".to_string(),
                }),
            }
        }
    }
}

/// System prompt for analysis requests
const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an analysis module inside a civilization simulation.
Answer exactly in the format the user asks for.
When JSON is requested, output a single JSON object and nothing else."#;
