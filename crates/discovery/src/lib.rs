//! Discovery adapters: one per provider, each returning a flat list of
//! candidate models.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use keeper_catalog::DiscoveredModel;
use keeper_config::{AdapterKind, AppConfig};

pub mod dedupe;
pub mod health;
pub mod openai_compat;
pub mod snapshot;

pub use dedupe::deduplicate;
pub use health::{DiscoveryError, SourceHealthError, check_model_count, discover_checked};
pub use openai_compat::OpenAiCompatAdapter;
pub use snapshot::SnapshotAdapter;

/// Source tag for entries read from a provider's model listing API.
pub const SOURCE_API: &str = "api";
/// Source tag for entries scraped or transcribed from documentation.
pub const SOURCE_DOCS: &str = "docs";

// ── Adapter trait ────────────────────────────────────────────────────────────

#[async_trait]
pub trait DiscoveryAdapter: Send + Sync {
    /// Provider group this adapter feeds, e.g. `openai`.
    fn name(&self) -> &str;

    /// Source tags this adapter can produce.
    fn supported_sources(&self) -> Vec<String> {
        vec![SOURCE_API.to_string()]
    }

    /// Fetches every model the provider currently reports for the
    /// requested sources.  Sources the adapter does not support are
    /// ignored.
    async fn discover(&self, sources: &[String]) -> Result<Vec<DiscoveredModel>>;

    /// Lightweight liveness probe run before discovery.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Fewest models a healthy source should report.  `0` disables the
    /// post-discovery count check.
    fn min_expected_models(&self) -> usize {
        0
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Adapters keyed by provider name.  Built once at startup and passed down
/// explicitly.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn DiscoveryAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an adapter for each of `providers` from its
    /// `[providers.<name>]` table.
    pub fn from_config(cfg: &AppConfig, providers: &[String]) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("catalog-keeper/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut registry = Self::new();
        for provider in providers {
            let source = cfg.provider_source(provider);
            let adapter: Arc<dyn DiscoveryAdapter> = match source.kind {
                AdapterKind::Snapshot => {
                    let path = if source.snapshot_path.is_empty() {
                        cfg.catalog_root()
                            .join("snapshots")
                            .join(format!("{provider}.yaml"))
                    } else {
                        source.snapshot_path.clone().into()
                    };
                    Arc::new(
                        SnapshotAdapter::new(provider, path)
                            .with_source(&source.source)
                            .with_min_expected(source.min_expected_models),
                    )
                }
                AdapterKind::OpenaiCompatible => {
                    if source.base_url.is_empty() {
                        bail!("provider {provider}: openai-compatible adapter needs base_url");
                    }
                    let api_key = if source.api_key_env.is_empty() {
                        String::new()
                    } else {
                        std::env::var(&source.api_key_env).unwrap_or_default()
                    };
                    Arc::new(
                        OpenAiCompatAdapter::new(provider, &source.base_url, api_key, client.clone())?
                            .with_min_expected(source.min_expected_models),
                    )
                }
            };
            registry.register(adapter);
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn DiscoveryAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DiscoveryAdapter>> {
        match self.adapters.get(name) {
            Some(adapter) => Ok(Arc::clone(adapter)),
            None => bail!("unknown provider: {name}"),
        }
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
