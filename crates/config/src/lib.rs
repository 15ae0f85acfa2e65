use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Review policy ─────────────────────────────────────────────────────────────

/// What the sync runtime does with a change set the risk gate flags.
///
/// | Mode    | Behaviour                                                      |
/// |---------|----------------------------------------------------------------|
/// | `draft` | Write the changes and open the pull request as a draft.        |
/// | `block` | Skip writing the group entirely and report it as blocked.      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPolicy {
    #[default]
    Draft,
    Block,
}

/// What happens to entries the LLM reviewer rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectPolicy {
    /// Keep the entries but force the pull request into draft.
    #[default]
    Draft,
    /// Drop rejected entries from the change set before writing.
    Exclude,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// Reads discovered records from a local YAML or JSON file.
    #[default]
    Snapshot,
    /// Lists models from a `/v1/models` style endpoint.
    OpenaiCompatible,
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog root: holds `version.txt`, `manifest.yaml` and `providers/`.
    /// Also the working tree that sync commits are made in.
    pub path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: "../model-catalog".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub providers: Vec<String>,
    /// Source tags stamped into `x_updater.sources` on every written record.
    pub sources: Vec<String>,
    pub dry_run: bool,
    /// Upper bound on provider groups reconciled at the same time.
    pub max_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            providers: vec!["openai".to_string()],
            sources: vec!["api".to_string()],
            dry_run: false,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiffConfig {
    /// Report `display_name` drift.  Off by default: the stored label is
    /// treated as curated.
    pub track_display_name: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_changed: usize,
    pub max_disappeared: usize,
    /// Relative cost movement above which a change set needs review.
    pub max_price_delta: f64,
    pub on_review: ReviewPolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_changed: 25,
            max_disappeared: 3,
            max_price_delta: 0.35,
            on_review: ReviewPolicy::Draft,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    /// Fraction of an adapter's `min_expected_models` that discovery must
    /// return before the result is trusted.
    pub threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub enabled: bool,
    /// `anthropic` or `openai`.
    pub provider: String,
    pub model: String,
    pub on_reject: RejectPolicy,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            on_reject: RejectPolicy::Draft,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// Overridden by `ANTHROPIC_API_KEY` when set.
    pub api_key: String,
    pub base_url: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Overridden by `OPENAI_API_KEY` when set.
    pub api_key: String,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Overridden by `GITHUB_TOKEN` when set.
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub api_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            owner: String::new(),
            repo: String::new(),
            base_branch: "main".to_string(),
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// One `[providers.<name>]` table: how to discover a single provider group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSourceConfig {
    pub kind: AdapterKind,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub snapshot_path: String,
    /// `0` disables the post-discovery count check for this provider.
    pub min_expected_models: usize,
    /// Source tag this adapter reports (`api` or `docs`).
    pub source: String,
}

impl Default for ProviderSourceConfig {
    fn default() -> Self {
        Self {
            kind: AdapterKind::Snapshot,
            base_url: String::new(),
            api_key_env: String::new(),
            snapshot_path: String::new(),
            min_expected_models: 0,
            source: "api".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Directory for daily rolling log files.  Empty logs to stderr only.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub sync: SyncConfig,
    pub diff: DiffConfig,
    pub risk: RiskConfig,
    pub health: HealthConfig,
    pub judge: JudgeConfig,
    pub anthropic: AnthropicConfig,
    pub openai: OpenAiConfig,
    pub github: GithubConfig,
    pub providers: BTreeMap<String, ProviderSourceConfig>,
    pub telemetry: TelemetryConfig,
}

fn env_override(name: &str, slot: &mut String) {
    if let Ok(value) = env::var(name) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        env_override("GITHUB_TOKEN", &mut config.github.token);
        env_override("ANTHROPIC_API_KEY", &mut config.anthropic.api_key);
        env_override("OPENAI_API_KEY", &mut config.openai.api_key);
        env_override("KEEPER_CATALOG_PATH", &mut config.catalog.path);
        env_override("KEEPER_LOG_LEVEL", &mut config.telemetry.log_level);

        if let Ok(value) = env::var("KEEPER_JUDGE_ENABLED") {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.judge.enabled = true,
                "0" | "false" | "no" => config.judge.enabled = false,
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn catalog_root(&self) -> PathBuf {
        PathBuf::from(&self.catalog.path)
    }

    /// Source settings for `provider`, falling back to a snapshot adapter
    /// reading `<catalog>/snapshots/<provider>.yaml`.
    pub fn provider_source(&self, provider: &str) -> ProviderSourceConfig {
        self.providers.get(provider).cloned().unwrap_or_else(|| ProviderSourceConfig {
            snapshot_path: Path::new(&self.catalog.path)
                .join("snapshots")
                .join(format!("{provider}.yaml"))
                .to_string_lossy()
                .into_owned(),
            ..ProviderSourceConfig::default()
        })
    }

    /// API key for the configured judge provider, or an empty string.
    pub fn judge_api_key(&self) -> &str {
        if self.judge.provider.eq_ignore_ascii_case("openai") {
            &self.openai.api_key
        } else {
            &self.anthropic.api_key
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
