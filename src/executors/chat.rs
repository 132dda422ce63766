//! LLM chat-completion executor.
//!
//! Speaks the OpenAI-compatible `chat/completions` surface that every
//! supported backend exposes. Online backends (`openai`, `anthropic`,
//! `openrouter`, `groq`) authenticate with a bearer token resolved from
//! the config or the backend's conventional environment variable; local
//! backends (`ollama`, `local`) talk to a loopback server and are
//! rejected by the validator in sandbox deployments. Shares the HTTP
//! executor's retry and cache discipline.

use crate::constants;
use crate::duration::parse_duration_or;
use crate::engine::context::ExecutionContext;
use crate::engine::registry::Executor;
use crate::error::Error;
use crate::executors::cache::{self, ResolvedCache};
use crate::executors::retry::RetryPolicy;
use crate::executors::{eval_field, eval_opt_field};
use crate::workflow::{ChatConfig, ResourceKind, RunSpec};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

pub struct ChatExecutor;

#[async_trait]
impl Executor for ChatExecutor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Chat
    }

    async fn execute(&self, ctx: &ExecutionContext, run: &RunSpec) -> Result<Value, Error> {
        let RunSpec::Chat(config) = run else {
            return Err(Error::invalid_config_type("chat"));
        };
        execute_chat(ctx, config).await
    }
}

/// Default base URL and token environment variable per backend.
fn backend_defaults(backend: &str) -> Result<(&'static str, Option<&'static str>), Error> {
    match backend {
        "openai" => Ok(("https://api.openai.com/v1", Some("OPENAI_API_KEY"))),
        "anthropic" => Ok(("https://api.anthropic.com/v1", Some("ANTHROPIC_API_KEY"))),
        "openrouter" => Ok(("https://openrouter.ai/api/v1", Some("OPENROUTER_API_KEY"))),
        "groq" => Ok(("https://api.groq.com/openai/v1", Some("GROQ_API_KEY"))),
        "ollama" => Ok(("http://localhost:11434/v1", None)),
        "local" => Ok(("http://localhost:8080/v1", None)),
        other => Err(Error::invalid_config(format!(
            "unsupported chat backend '{other}'"
        ))),
    }
}

async fn execute_chat(ctx: &ExecutionContext, config: &ChatConfig) -> Result<Value, Error> {
    let scope = ctx.expression_scope();

    let backend = config.backend.as_deref().unwrap_or("openai").to_lowercase();
    let (default_base, token_env) = backend_defaults(&backend)?;

    let model = eval_field(&config.model, &scope, "model")?;
    if model.trim().is_empty() {
        return Err(Error::invalid_config("model is required"));
    }
    let prompt = eval_field(&config.prompt, &scope, "prompt")?;
    let system = eval_opt_field(config.system.as_deref(), &scope, "system")?;
    let base_url = eval_opt_field(config.base_url.as_deref(), &scope, "baseUrl")?
        .unwrap_or_else(|| default_base.to_string());

    let token = match eval_opt_field(config.token.as_deref(), &scope, "token")? {
        Some(t) if !t.is_empty() => Some(t),
        _ => token_env.and_then(|name| std::env::var(name).ok()),
    };

    let timeout_text = config
        .timeout_duration
        .as_deref()
        .map(|t| eval_field(t, &scope, "timeoutDuration"))
        .transpose()?;
    let timeout = parse_duration_or(
        timeout_text.as_deref(),
        Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
    );

    let retry = RetryPolicy::resolve(config.retry.as_ref(), &scope)?;
    let resolved_cache = ResolvedCache::resolve(config.cache.as_ref(), &scope)?;

    let cache_key = resolved_cache
        .as_ref()
        .filter(|c| c.enabled)
        .map(|c| {
            cache::derived_cache_key(
                constants::CACHE_PREFIX_CHAT,
                c,
                &[backend.as_str(), model.as_str(), prompt.as_str()],
            )
        });
    if let Some(key) = &cache_key {
        if let Some(hit) = cache::check(&ctx.memory, key) {
            return Ok(hit);
        }
    }

    let payload = build_payload(config, &model, system.as_deref(), &prompt);
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::network_request_failed(format!("failed to build HTTP client: {e}")))?;

    let result =
        send_with_retry(&client, &url, token.as_deref(), &payload, retry.as_ref()).await;

    if let Some(key) = &cache_key {
        if result.get(constants::RESULT_KEY_ERROR).is_none() {
            cache::put(&ctx.memory, key, &result);
        }
    }

    Ok(result)
}

fn build_payload(config: &ChatConfig, model: &str, system: Option<&str>, prompt: &str) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let mut payload = Map::new();
    payload.insert("model".to_string(), Value::String(model.to_string()));
    payload.insert("messages".to_string(), Value::Array(messages));
    if let Some(temperature) = config.temperature {
        payload.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = config.max_tokens {
        payload.insert("max_tokens".to_string(), json!(max_tokens));
    }
    Value::Object(payload)
}

async fn send_with_retry(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    payload: &Value,
    retry: Option<&RetryPolicy>,
) -> Value {
    let attempts = retry.map_or(1, |r| r.max_attempts.max(1));

    for attempt in 1..=attempts {
        let mut request = client.post(url).json(payload);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Err(e) => {
                let message = e.to_string();
                if attempt < attempts {
                    if let Some(policy) = retry {
                        debug!(attempt, error = %message, "chat transport error, retrying");
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                        continue;
                    }
                }
                return json!({ constants::RESULT_KEY_ERROR: message });
            }
            Ok(response) => {
                let status = response.status().as_u16();
                if attempt < attempts {
                    if let Some(policy) = retry {
                        if policy.should_retry_status(status) {
                            debug!(attempt, status, "chat status warrants retry");
                            drop(response);
                            tokio::time::sleep(policy.delay_for(attempt)).await;
                            continue;
                        }
                    }
                }
                return shape_completion(response).await;
            }
        }
    }

    json!({ constants::RESULT_KEY_ERROR: "no attempts executed" })
}

/// Shapes a completion response: `model`, `statusCode`, `response` (the
/// first choice's content when present), and `usage`. Non-2xx statuses
/// are reflected, not raised.
async fn shape_completion(response: reqwest::Response) -> Value {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            return json!({ constants::RESULT_KEY_ERROR: format!("failed to read response body: {e}") })
        }
    };

    let mut result = Map::new();
    result.insert("statusCode".to_string(), json!(status));
    result.insert("body".to_string(), Value::String(body.clone()));

    if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
        if let Some(model) = parsed.get("model") {
            result.insert("model".to_string(), model.clone());
        }
        if let Some(content) = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            result.insert("response".to_string(), Value::String(content.to_string()));
        }
        if let Some(usage) = parsed.get("usage") {
            result.insert("usage".to_string(), usage.clone());
        }
        result.insert("data".to_string(), parsed);
    }

    Value::Object(result)
}
