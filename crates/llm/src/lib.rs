use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use keeper_config::AppConfig;
use serde_json::json;

pub mod prompt;
pub mod reviewer;

pub use reviewer::{LlmReviewer, parse_response};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One-shot completion endpoint: a system prompt and a user prompt in,
/// the model's text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// `provider/model`, for logs.
    fn label(&self) -> String;

    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

// ── Anthropic ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key: api_key.into(),
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            model: model.into(),
            max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn label(&self) -> String {
        format!("anthropic/{}", self.model)
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [
                {"role": "user", "content": user}
            ]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .context("sending anthropic request")?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.context("reading anthropic response")?;
        if !status.is_success() {
            bail!("anthropic API error ({status}): {body}");
        }
        if let Some(err) = body.get("error") {
            bail!("anthropic error: {err}");
        }

        let text: String = body
            .get("content")
            .and_then(|content| content.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        if text.is_empty() {
            bail!("empty response from anthropic");
        }
        Ok(text)
    }
}

// ── OpenAI-compatible ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn label(&self) -> String {
        format!("openai/{}", self.model)
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("sending openai request")?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.context("reading openai response")?;
        if !status.is_success() {
            bail!("openai API error ({status}): {body}");
        }

        match body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
        {
            Some(content) if !content.is_empty() => Ok(content.to_string()),
            _ => bail!("empty response from openai: {body}"),
        }
    }
}

/// Builds the client named by `[judge] provider`.
pub fn client_from_config(cfg: &AppConfig) -> Result<Box<dyn LlmClient>> {
    let api_key = cfg.judge_api_key();
    if api_key.is_empty() {
        bail!(
            "judge is enabled but no API key is set for provider {:?}",
            cfg.judge.provider
        );
    }
    let timeout = Duration::from_secs(cfg.judge.timeout_secs);
    let max_tokens = cfg.judge.max_tokens;
    match cfg.judge.provider.to_lowercase().as_str() {
        "anthropic" => Ok(Box::new(AnthropicClient::new(
            api_key,
            &cfg.anthropic.base_url,
            &cfg.judge.model,
            max_tokens,
            timeout,
        )?)),
        "openai" => Ok(Box::new(OpenAiClient::new(
            api_key,
            &cfg.openai.base_url,
            &cfg.judge.model,
            max_tokens,
            timeout,
        )?)),
        other => bail!("unknown judge provider {other:?} (expected anthropic or openai)"),
    }
}

// ── JSON extraction ──────────────────────────────────────────────────────────

/// Finds the JSON object in an LLM reply.
///
/// Tries, in order: the whole trimmed reply, a ` ```json ` fence, a bare
/// ` ``` ` fence, and the span from the first `{` to the last `}`.
/// Returns `None` when none of them parse.
pub fn extract_json(response: &str) -> Option<&str> {
    let trimmed = response.trim();
    if is_json(trimmed) {
        return Some(trimmed);
    }

    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let body = &trimmed[start + fence.len()..];
            if let Some(end) = body.find("```") {
                let candidate = body[..end].trim();
                if is_json(candidate) {
                    return Some(candidate);
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            let candidate = &trimmed[start..=end];
            if is_json(candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

fn is_json(s: &str) -> bool {
    !s.is_empty() && serde_json::from_str::<serde::de::IgnoredAny>(s).is_ok()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_plain_json() {
        assert_eq!(extract_json("  {\"a\":1}\n"), Some("{\"a\":1}"));
    }

    #[test]
    fn extract_fenced_json() {
        let raw = "Sure!\n```json\n{\"verdicts\":[]}\n```";
        assert_eq!(extract_json(raw), Some("{\"verdicts\":[]}"));
    }

    #[test]
    fn extract_plain_fence() {
        let raw = "```\n{\"verdicts\":[]}\n```\nthanks";
        assert_eq!(extract_json(raw), Some("{\"verdicts\":[]}"));
    }

    #[test]
    fn extract_embedded_object() {
        let raw = "Here you go: {\"verdicts\": [{\"x\": 1}]} -- done";
        assert_eq!(extract_json(raw), Some("{\"verdicts\": [{\"x\": 1}]}"));
    }

    #[test]
    fn extract_nothing() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{ broken"), None);
        assert_eq!(extract_json(""), None);
    }

    #[test]
    fn client_requires_key_and_known_provider() {
        let mut cfg = AppConfig::default();
        assert!(client_from_config(&cfg).is_err());

        cfg.anthropic.api_key = "sk-ant".to_string();
        let client = client_from_config(&cfg).unwrap();
        assert!(client.label().starts_with("anthropic/"));

        cfg.judge.provider = "mistral".to_string();
        assert!(client_from_config(&cfg).is_err());
    }
}
