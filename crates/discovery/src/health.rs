//! Source-health gating around discovery.

use keeper_catalog::DiscoveredModel;
use keeper_config::HealthConfig;
use thiserror::Error;
use tracing::{info, warn};

use crate::{DiscoveryAdapter, deduplicate};

/// A source that looks broken rather than merely changed.  Nothing it
/// reports should reach the catalog.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("source health check failed for {provider}: {reason}")]
pub struct SourceHealthError {
    pub provider: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Unhealthy(#[from] SourceHealthError),

    #[error("discovery failed for {provider}: {source:#}")]
    Failed {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Fails when `count` is below `min_expected × threshold`.  A zero minimum
/// disables the check.
pub fn check_model_count(
    provider: &str,
    min_expected: usize,
    threshold: f64,
    count: usize,
) -> Result<(), SourceHealthError> {
    if min_expected == 0 {
        return Ok(());
    }
    let required = (min_expected as f64 * threshold) as usize;
    if count < required {
        return Err(SourceHealthError {
            provider: provider.to_string(),
            reason: format!(
                "discovered {count} models, below threshold {required} (min={min_expected} × {:.0}%)",
                threshold * 100.0
            ),
        });
    }
    Ok(())
}

/// Probes, discovers, deduplicates and count-checks one provider.
pub async fn discover_checked(
    adapter: &dyn DiscoveryAdapter,
    sources: &[String],
    health: &HealthConfig,
) -> Result<Vec<DiscoveredModel>, DiscoveryError> {
    let provider = adapter.name();

    if health.enabled {
        if let Err(err) = adapter.health_check().await {
            warn!(provider, error = %err, "liveness probe failed");
            return Err(SourceHealthError {
                provider: provider.to_string(),
                reason: format!("liveness probe failed: {err:#}"),
            }
            .into());
        }
    }

    let models = adapter
        .discover(sources)
        .await
        .map_err(|source| DiscoveryError::Failed {
            provider: provider.to_string(),
            source,
        })?;
    let models = deduplicate(models);

    if health.enabled {
        check_model_count(
            provider,
            adapter.min_expected_models(),
            health.threshold,
            models.len(),
        )?;
    }

    info!(provider, count = models.len(), "discovery complete");
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use async_trait::async_trait;

    struct Fixed {
        models: usize,
        alive: bool,
        min: usize,
    }

    #[async_trait]
    impl DiscoveryAdapter for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn discover(&self, _sources: &[String]) -> Result<Vec<DiscoveredModel>> {
            Ok((0..self.models)
                .map(|i| DiscoveredModel::named(format!("m{i}")))
                .collect())
        }

        async fn health_check(&self) -> Result<()> {
            if !self.alive {
                bail!("503 Service Unavailable");
            }
            Ok(())
        }

        fn min_expected_models(&self) -> usize {
            self.min
        }
    }

    fn health() -> HealthConfig {
        HealthConfig {
            enabled: true,
            threshold: 0.5,
        }
    }

    #[test]
    fn count_threshold_math() {
        assert!(check_model_count("p", 10, 0.5, 5).is_ok());
        let err = check_model_count("p", 10, 0.5, 4).unwrap_err();
        assert!(err.reason.contains("below threshold 5"));
        assert!(check_model_count("p", 0, 0.5, 0).is_ok());
    }

    #[tokio::test]
    async fn failed_probe_is_unhealthy() {
        let adapter = Fixed { models: 3, alive: false, min: 0 };
        let err = discover_checked(&adapter, &[], &health()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unhealthy(_)));
    }

    #[tokio::test]
    async fn too_few_models_is_unhealthy() {
        let adapter = Fixed { models: 2, alive: true, min: 10 };
        let err = discover_checked(&adapter, &[], &health()).await.unwrap_err();
        assert!(err.to_string().contains("discovered 2 models"));
    }

    #[tokio::test]
    async fn disabled_health_skips_both_checks() {
        let adapter = Fixed { models: 2, alive: false, min: 10 };
        let disabled = HealthConfig {
            enabled: false,
            ..health()
        };
        let models = discover_checked(&adapter, &[], &disabled).await.unwrap();
        assert_eq!(models.len(), 2);
    }
}
