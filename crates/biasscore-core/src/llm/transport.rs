//! OpenAI-compatible chat-completion transport with failover and backoff.

use crate::config::{EnsembleConfig, LlmConfig, ModelConfig};
use crate::error::TransportError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BACKOFF_BASE_MS: f64 = 250.0;
const BACKOFF_FACTOR: f64 = 2.0;
const BACKOFF_CAP_MS: f64 = 4000.0;
const BACKOFF_JITTER: f64 = 0.2;
const MAX_UNAVAILABLE_RETRIES: u32 = 2;

/// The raw text reply of a single scoring call, plus the model that actually
/// answered (may differ from the requested model after perspective failover).
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// The assistant's raw text content, to be handed to the parser.
    pub text: String,
    /// The model identifier that produced this reply.
    pub responding_model: String,
}

/// A single HTTP client shared across every model in the ensemble roster.
pub struct Transport {
    client: reqwest::Client,
    llm: LlmConfig,
}

impl Transport {
    /// Build a transport from the service's LLM configuration.
    pub fn new(llm: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_seconds))
            .build()
            .expect("failed to build reqwest client");
        Self { client, llm }
    }

    /// Build a transport with an explicit client (for tests against a mock server).
    pub fn with_client(llm: LlmConfig, client: reqwest::Client) -> Self {
        Self { client, llm }
    }

    /// Score a single piece of content against one model, applying the
    /// rate-limit failover protocol and per-call backoff.
    pub async fn score_content(
        &self,
        content: &str,
        model: &ModelConfig,
        cfg: &EnsembleConfig,
    ) -> Result<TransportReply, TransportError> {
        match self
            .call_with_backoff(content, model, self.llm.primary_key.as_deref())
            .await
        {
            Ok(reply) => Ok(reply),
            Err(TransportError::RateLimited { retry_after_secs }) => {
                self.failover(content, model, cfg, retry_after_secs).await
            }
            Err(other) => Err(other),
        }
    }

    /// Step 1 of the failover protocol: retry the same model with the
    /// secondary credential, then fall through to alternate-model failover.
    async fn failover(
        &self,
        content: &str,
        model: &ModelConfig,
        cfg: &EnsembleConfig,
        retry_after_secs: Option<u64>,
    ) -> Result<TransportReply, TransportError> {
        let mut last_retry_after = retry_after_secs;

        if let Some(secondary) = self.llm.secondary_key.clone() {
            match self
                .call_with_backoff(content, model, Some(&secondary))
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(TransportError::RateLimited { retry_after_secs }) => {
                    last_retry_after = retry_after_secs;
                }
                Err(other) => return Err(other),
            }
        }

        self.failover_alternate_models(content, model, cfg, last_retry_after)
            .await
    }

    /// Step 2/3: iterate alternative models sharing the requested model's
    /// perspective, trying both credentials, before giving up.
    async fn failover_alternate_models(
        &self,
        content: &str,
        model: &ModelConfig,
        cfg: &EnsembleConfig,
        mut last_retry_after: Option<u64>,
    ) -> Result<TransportReply, TransportError> {
        let credentials: Vec<Option<String>> = std::iter::once(self.llm.primary_key.clone())
            .chain(std::iter::once(self.llm.secondary_key.clone()))
            .filter(|c| c.is_some())
            .collect();

        let alternatives: Vec<&ModelConfig> = cfg
            .models_for_perspective(model.perspective)
            .into_iter()
            .filter(|m| m.name != model.name)
            .collect();

        for alt in alternatives {
            for credential in &credentials {
                match self
                    .call_with_backoff(content, alt, credential.as_deref())
                    .await
                {
                    Ok(reply) => return Ok(reply),
                    Err(TransportError::RateLimited { retry_after_secs }) => {
                        last_retry_after = retry_after_secs;
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        Err(TransportError::RateLimited {
            retry_after_secs: last_retry_after,
        })
    }

    /// Call a single model with exponential backoff retries on `Unavailable`.
    async fn call_with_backoff(
        &self,
        content: &str,
        model: &ModelConfig,
        credential: Option<&str>,
    ) -> Result<TransportReply, TransportError> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(content, model, credential).await {
                Ok(reply) => {
                    tracing::info!(
                        target: "biasscore::metrics",
                        counter = "requests_total",
                        model = %model.name,
                        "LLM request succeeded"
                    );
                    return Ok(reply);
                }
                Err(TransportError::Unavailable { message }) if attempt < MAX_UNAVAILABLE_RETRIES => {
                    tracing::warn!(model = %model.name, attempt, %message, "LLM unavailable, retrying");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::info!(
                        target: "biasscore::metrics",
                        counter = "failures_total",
                        kind = ?err.code(),
                        model = %model.name,
                        "LLM request failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// A single HTTP call, status-code classified into the `TransportError` taxonomy.
    async fn call_once(
        &self,
        content: &str,
        model: &ModelConfig,
        credential: Option<&str>,
    ) -> Result<TransportReply, TransportError> {
        let url = model
            .url
            .clone()
            .unwrap_or_else(|| self.llm.base_url.clone());

        let request = ChatCompletionRequest {
            model: &model.name,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: 0.0,
        };

        let started = std::time::Instant::now();
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = credential {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                TransportError::Unavailable {
                    message: e.to_string(),
                }
            } else {
                TransportError::Request(e)
            }
        })?;

        let status = response.status();
        let duration = started.elapsed();
        tracing::debug!(model = %model.name, status = status.as_u16(), ?duration, "LLM call completed");
        tracing::info!(
            target: "biasscore::metrics",
            histogram = "duration_seconds",
            value = duration.as_secs_f64(),
            model = %model.name,
            "LLM call duration"
        );

        if !status.is_success() {
            let code = status.as_u16();
            return Err(match code {
                401 => TransportError::AuthFailed,
                402 => TransportError::PaymentRequired,
                429 => TransportError::RateLimited {
                    retry_after_secs: parse_retry_after(&response),
                },
                500..=599 => TransportError::Unavailable {
                    message: format!("HTTP {code}"),
                },
                _ => TransportError::Unavailable {
                    message: format!("HTTP {code}"),
                },
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::StreamingError("no choices in response".to_string()))?;

        Ok(TransportReply {
            text: choice.message.content,
            responding_model: if body.model.is_empty() {
                model.name.clone()
            } else {
                body.model
            },
        })
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

/// Exponential backoff with jitter: `base * factor^attempt`, capped, ±20% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let raw = (BACKOFF_BASE_MS * BACKOFF_FACTOR.powi(attempt as i32)).min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    let ms = (raw * (1.0 + jitter)).max(0.0);
    Duration::from_millis(ms as u64)
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}
