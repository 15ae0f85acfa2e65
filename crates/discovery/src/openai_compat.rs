//! Adapter for providers exposing an OpenAI-style `GET /models` listing.
//!
//! The listing only carries identifiers (plus, for some providers, a
//! context window and per-token pricing).  Those are the only attributes
//! reported as facts.  Family, status, limits, capabilities and modalities
//! are inferred from the model id and kept as new-record defaults, so a
//! listing pass never rewrites what a curator put in an existing record.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use keeper_catalog::{Cost, DiscoveredLimits, DiscoveredModalities, DiscoveredModel, Status};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{DiscoveryAdapter, SOURCE_API};

/// A four or eight digit date segment after the first, as in `gpt-4-0613`,
/// `claude-3-opus-20240229` or `gpt-4o-2024-05-13`.
static SNAPSHOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d{4}|\d{8})(-|$)").expect("static regex"));

/// Id prefix to family, first match wins.
const FAMILY_PREFIXES: &[(&str, &str)] = &[
    ("gpt-5", "gpt-5"),
    ("gpt-4", "gpt-4"),
    ("gpt-3.5", "gpt-3.5"),
    ("o4", "o-series"),
    ("o3", "o-series"),
    ("o1", "o-series"),
    ("text-embedding", "embedding"),
];

/// Ids that are not chat or embedding models in any catalog sense.
const SKIP_PREFIXES: &[&str] = &[
    "ft:",
    "dall-e",
    "tts-",
    "whisper",
    "text-moderation",
    "omni-moderation",
    "babbage",
    "davinci",
    "curie",
    "ada-",
];

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ApiModel>,
}

#[derive(Debug, Deserialize)]
struct ApiModel {
    id: String,
    #[serde(default, alias = "context_window")]
    context_length: Option<u64>,
    #[serde(default)]
    pricing: Option<ApiPricing>,
}

/// Per-token USD prices, as strings or numbers depending on the provider.
#[derive(Debug, Deserialize)]
struct ApiPricing {
    #[serde(default)]
    prompt: Option<serde_json::Value>,
    #[serde(default)]
    completion: Option<serde_json::Value>,
}

fn per_token(value: &Option<serde_json::Value>) -> Option<f64> {
    match value.as_ref()? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    name: String,
    models_url: Url,
    api_key: String,
    client: reqwest::Client,
    min_expected: usize,
}

impl OpenAiCompatAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: String,
        client: reqwest::Client,
    ) -> Result<Self> {
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .with_context(|| format!("invalid base_url {base_url:?}"))?;
        Ok(Self {
            name: name.into(),
            models_url: base.join("models")?,
            api_key,
            client,
            min_expected: 0,
        })
    }

    pub fn with_min_expected(mut self, min: usize) -> Self {
        self.min_expected = min;
        self
    }

    async fn fetch(&self, timeout: Option<Duration>) -> Result<ModelsResponse> {
        let mut request = self.client.get(self.models_url.clone());
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {}", self.models_url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GET {} returned {status}: {}", self.models_url, body.trim());
        }
        response
            .json()
            .await
            .with_context(|| format!("parsing {} response", self.models_url))
    }
}

#[async_trait]
impl DiscoveryAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self, sources: &[String]) -> Result<Vec<DiscoveredModel>> {
        if !sources.iter().any(|s| s == SOURCE_API) {
            debug!(provider = %self.name, "api source not requested");
            return Ok(Vec::new());
        }
        let listing = self.fetch(None).await?;
        let total = listing.data.len();
        let models: Vec<_> = listing.data.iter().filter_map(to_discovered).collect();
        info!(
            provider = %self.name,
            listed = total,
            kept = models.len(),
            "api discovery complete"
        );
        Ok(models)
    }

    async fn health_check(&self) -> Result<()> {
        self.fetch(Some(Duration::from_secs(10))).await.map(|_| ())
    }

    fn min_expected_models(&self) -> usize {
        self.min_expected
    }
}

// ── Inference ────────────────────────────────────────────────────────────────

fn to_discovered(api: &ApiModel) -> Option<DiscoveredModel> {
    let id = api.id.as_str();
    if should_skip(id) {
        return None;
    }

    let cost = api.pricing.as_ref().and_then(|p| {
        let input = per_token(&p.prompt)?;
        let output = per_token(&p.completion)?;
        Some(Cost::new(input * 1000.0, output * 1000.0))
    });

    let mut defaults = inferred(id);
    if let (Some(context), Some(limits)) = (api.context_length, defaults.limits.as_mut()) {
        // A family default never exceeds the window the provider reports.
        limits.max_completion_tokens = limits.max_completion_tokens.filter(|v| *v <= context);
    }

    let mut model = DiscoveredModel::named(id);
    model.cost = cost;
    model.limits = api.context_length.map(|max| DiscoveredLimits {
        max_tokens: Some(max),
        max_completion_tokens: None,
    });
    model.discovered_by = SOURCE_API.to_string();
    model.defaults = Some(Box::new(defaults));
    Some(model)
}

/// What a new record for `id` starts from when nothing better is known.
fn inferred(id: &str) -> DiscoveredModel {
    let family = infer_family(id);
    let capabilities = infer_capabilities(id);
    let (max_tokens, max_completion_tokens) = infer_limits(family);

    let mut model = DiscoveredModel::named(id);
    model.display_name = Some(infer_display_name(id));
    model.family = Some(family.to_string());
    model.status = Some(Status::Stable);
    model.limits = Some(DiscoveredLimits {
        max_tokens: Some(max_tokens),
        max_completion_tokens,
    });
    model.modalities = Some(infer_modalities(&capabilities));
    model.capabilities = Some(capabilities);
    model
}

fn should_skip(id: &str) -> bool {
    SKIP_PREFIXES.iter().any(|p| id.starts_with(p)) || is_dated_snapshot(id)
}

/// Pinned releases such as `gpt-4-0613` or `gpt-4o-2024-05-13`; only the
/// floating alias is tracked.
pub fn is_dated_snapshot(id: &str) -> bool {
    let last = id.rsplit('/').next().unwrap_or(id);
    SNAPSHOT_RE.is_match(last)
}

fn infer_family(id: &str) -> &'static str {
    let last = id.rsplit('/').next().unwrap_or(id).to_lowercase();
    FAMILY_PREFIXES
        .iter()
        .find(|(prefix, _)| last.starts_with(prefix))
        .map(|(_, family)| *family)
        .unwrap_or(if last.contains("embed") { "embedding" } else { "other" })
}

/// `(max_tokens, max_completion_tokens)` typical for a family.
fn infer_limits(family: &str) -> (u64, Option<u64>) {
    match family {
        "gpt-5" | "gpt-4" => (128_000, Some(16_384)),
        "gpt-3.5" => (16_385, Some(4_096)),
        "o-series" => (200_000, Some(100_000)),
        "embedding" => (8_191, None),
        _ => (128_000, None),
    }
}

/// `gpt-4o-mini` becomes `GPT-4o Mini`, `o3-mini` becomes `O3 Mini`.
fn infer_display_name(id: &str) -> String {
    let last = id.rsplit('/').next().unwrap_or(id);
    let mut words: Vec<String> = last
        .split(['-', '_'])
        .filter(|s| !s.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.len() > 1 && words[0].eq_ignore_ascii_case("gpt") {
        let version = words.remove(1);
        words[0] = format!("GPT-{}", version.to_lowercase());
    }
    words.join(" ")
}

fn infer_capabilities(id: &str) -> Vec<String> {
    let id = id.to_lowercase();
    if id.contains("embed") {
        return vec!["embeddings".to_string()];
    }
    let mut caps = vec!["chat".to_string()];
    if !id.contains("instruct") {
        caps.push("function_calling".to_string());
    }
    let vision = ["gpt-4o", "gpt-4-turbo", "gpt-4.1", "gpt-5", "vision", "-vl"];
    if vision.iter().any(|v| id.contains(v)) {
        caps.push("vision".to_string());
    }
    caps
}

fn infer_modalities(capabilities: &[String]) -> DiscoveredModalities {
    let has = |c: &str| capabilities.iter().any(|x| x == c);
    let text = || vec!["text".to_string()];
    if has("embeddings") {
        return DiscoveredModalities {
            input: Some(text()),
            output: Some(vec!["embedding".to_string()]),
        };
    }
    let mut input = text();
    if has("vision") {
        input.push("image".to_string());
    }
    DiscoveredModalities {
        input: Some(input),
        output: Some(text()),
    }
}
