//! Sync runtime: wires configuration, discovery, reconciliation and
//! submission together for the `keeper` commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use keeper_catalog::{CatalogStore, DiscoveredModel};
use keeper_config::AppConfig;
use keeper_discovery::{AdapterRegistry, DiscoveryError, discover_checked};
use keeper_exec::Submission;
use keeper_llm::{LlmReviewer, client_from_config};
use keeper_reconcile::{
    Discovery, GroupInput, PassReport, ReconcileOptions, Reconciler, SchemaValidator,
    ValidationReport, render_pr_body, validate_catalog,
};
use tracing::{error, info, warn};

/// What `keeper sync` did.
#[derive(Debug)]
pub struct SyncOutcome {
    pub report: PassReport,
    pub submission: Option<Submission>,
}

impl SyncOutcome {
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code(false)
    }
}

pub struct SyncRuntime {
    config: AppConfig,
    registry: AdapterRegistry,
}

impl SyncRuntime {
    /// Builds adapters for every provider in `[sync] providers`.
    pub fn new(config: AppConfig) -> Result<Self> {
        let registry = AdapterRegistry::from_config(&config, &config.sync.providers)
            .context("building discovery adapters")?;
        Ok(Self::with_registry(config, registry))
    }

    /// For commands that only read or rewrite the stored catalog.  No
    /// adapters are built, so provider source settings are never checked.
    pub fn offline(config: AppConfig) -> Self {
        Self::with_registry(config, AdapterRegistry::new())
    }

    pub fn with_registry(config: AppConfig, registry: AdapterRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn store(&self) -> CatalogStore {
        CatalogStore::new(self.config.catalog_root())
    }

    // ── Discovery ────────────────────────────────────────────────────────────

    /// Discovers one provider through its health gate.
    pub async fn discover(&self, provider: &str) -> Result<Vec<DiscoveredModel>> {
        let adapter = self.registry.get(provider)?;
        Ok(discover_checked(adapter.as_ref(), &self.config.sync.sources, &self.config.health).await?)
    }

    /// Discovers every registered provider concurrently.  Failures become
    /// per-group inputs rather than errors.
    pub async fn discover_all(&self) -> Vec<GroupInput> {
        let names = self.registry.names();
        let results = join_all(names.iter().map(|name| async move {
            let adapter = self.registry.get(name)?;
            Ok::<_, anyhow::Error>(
                discover_checked(adapter.as_ref(), &self.config.sync.sources, &self.config.health).await,
            )
        }))
        .await;

        names
            .into_iter()
            .zip(results)
            .map(|(provider, result)| {
                let discovery = match result {
                    Ok(Ok(models)) => Discovery::Found(models),
                    Ok(Err(DiscoveryError::Unhealthy(err))) => Discovery::Unhealthy(err.reason),
                    Ok(Err(err)) => Discovery::Failed(format!("{err:#}")),
                    Err(err) => Discovery::Failed(format!("{err:#}")),
                };
                GroupInput { provider, discovery }
            })
            .collect()
    }

    // ── Reconciliation ───────────────────────────────────────────────────────

    fn reconciler(&self, dry_run: bool) -> Result<Reconciler> {
        let mut options = ReconcileOptions::from_config(&self.config);
        options.dry_run = dry_run;
        let mut reconciler = Reconciler::new(self.store(), options, Arc::new(SchemaValidator));

        if self.config.judge.enabled {
            let client = client_from_config(&self.config).context("configuring judge")?;
            info!(reviewer = %client.label(), "LLM review enabled");
            reconciler = reconciler.with_reviewer(Arc::new(LlmReviewer::new(client)));
        }
        Ok(reconciler)
    }

    /// Full pass: discover, reconcile, write, and open a pull request when
    /// files were written and `[github]` is configured.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let dry_run = self.config.sync.dry_run;
        let reconciler = self.reconciler(dry_run)?;
        let inputs = self.discover_all().await;
        let report = reconciler.run(inputs).await?;
        log_report(&report);

        let providers: Vec<String> = report
            .written_providers()
            .into_iter()
            .map(str::to_string)
            .collect();
        if dry_run || providers.is_empty() {
            return Ok(SyncOutcome {
                report,
                submission: None,
            });
        }
        if !self.submission_configured() {
            info!("[github] owner/repo not set, leaving changes in the worktree");
            return Ok(SyncOutcome {
                report,
                submission: None,
            });
        }

        let submission = keeper_exec::publish(
            &self.config.catalog_root(),
            &self.config.github,
            &providers,
            render_pr_body(&report),
            report.draft(),
            Utc::now(),
        )
        .await
        .inspect_err(|err| error!(error = %format!("{err:#}"), "submission failed"))?;

        if let Some(sub) = &submission {
            info!(
                branch = %sub.branch,
                commit = %sub.commit,
                pr = sub.pull_request.number,
                url = %sub.pull_request.html_url,
                "sync submitted"
            );
        }
        Ok(SyncOutcome { report, submission })
    }

    /// Dry-run pass; exit code 2 signals pending changes.
    pub async fn diff(&self) -> Result<PassReport> {
        let reconciler = self.reconciler(true)?;
        let inputs = self.discover_all().await;
        let report = reconciler.run(inputs).await?;
        log_report(&report);
        Ok(report)
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    pub fn validate(&self) -> Result<ValidationReport> {
        let providers = self.store().load_all()?;
        let report = validate_catalog(&SchemaValidator, &providers);
        info!(
            providers = providers.len(),
            errors = report.errors().count(),
            warnings = report.warnings().count(),
            "catalog validated"
        );
        Ok(report)
    }

    /// Regenerates `manifest.yaml`; `true` when the file changed.
    pub fn manifest(&self) -> Result<bool> {
        let store = self.store();
        let _lock = store.lock()?;
        keeper_reconcile::refresh_manifest(&store)
    }

    fn submission_configured(&self) -> bool {
        !self.config.github.owner.is_empty() && !self.config.github.repo.is_empty()
    }
}

fn log_report(report: &PassReport) {
    for group in &report.groups {
        let c = &group.counts;
        info!(
            provider = %group.provider,
            status = group.status.label(),
            new = c.new,
            updated = c.updated,
            unchanged = c.unchanged,
            disappeared = c.disappeared,
            renamed = c.renamed,
            files = group.files_written,
            "group reconciled"
        );
        for warning in &group.warnings {
            warn!(provider = %group.provider, "{warning}");
        }
    }
    if let Some(version) = &report.new_version {
        info!(from = %report.previous_version, to = %version, "catalog version advanced");
    }
}
