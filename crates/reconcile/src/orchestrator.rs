//! Reconciliation orchestrator: runs every provider group through
//! diff → risk → validation → review → write, then advances the catalog
//! version and regenerates the manifest once for the whole pass.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::{FutureExt, StreamExt, stream};
use keeper_catalog::{
    CatalogStore, CatalogVersion, CompareOptions, DiscoveredModel, SmartMergeWriter, UpdaterStamp,
    build_manifest, read_manifest, write_manifest,
};
use keeper_config::{AppConfig, RejectPolicy, ReviewPolicy};
use tracing::{debug, error, info, warn};

use crate::diff::{self, ChangeSet};
use crate::review::{ChangeReviewer, ReviewOutcome, ReviewRequest, apply_review};
use crate::risk::{self, RiskAssessment, RiskThresholds};
use crate::validate::{ValidationReport, Validator};

// ── Exit codes ───────────────────────────────────────────────────────────────

pub const EXIT_OK: i32 = 0;
pub const EXIT_CHANGES: i32 = 2;
pub const EXIT_BLOCKED: i32 = 3;
pub const EXIT_UNHEALTHY: i32 = 4;

// ── Inputs ───────────────────────────────────────────────────────────────────

/// What discovery produced for one provider group.
#[derive(Debug, Clone)]
pub enum Discovery {
    Found(Vec<DiscoveredModel>),
    /// The source failed its health gate; nothing it reported is trusted.
    Unhealthy(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct GroupInput {
    pub provider: String,
    pub discovery: Discovery,
}

impl GroupInput {
    pub fn found(provider: impl Into<String>, models: Vec<DiscoveredModel>) -> Self {
        Self {
            provider: provider.into(),
            discovery: Discovery::Found(models),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub compare: CompareOptions,
    pub thresholds: RiskThresholds,
    pub on_review: ReviewPolicy,
    pub on_reject: RejectPolicy,
    /// Compute and report everything, write nothing.
    pub dry_run: bool,
    /// Source labels recorded in each written record's updater stamp.
    pub sources: Vec<String>,
    pub max_concurrency: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            compare: CompareOptions::default(),
            thresholds: RiskThresholds::default(),
            on_review: ReviewPolicy::Draft,
            on_reject: RejectPolicy::Draft,
            dry_run: false,
            sources: vec!["api".to_string()],
            max_concurrency: 4,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            compare: CompareOptions {
                track_display_name: cfg.diff.track_display_name,
            },
            thresholds: RiskThresholds::from(&cfg.risk),
            on_review: cfg.risk.on_review,
            on_reject: cfg.judge.on_reject,
            dry_run: cfg.sync.dry_run,
            sources: cfg.sync.sources.clone(),
            max_concurrency: cfg.sync.max_concurrency.max(1),
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum GroupStatus {
    Applied,
    DryRun,
    NoChanges,
    Blocked { reason: String },
    Failed { error: String },
    Unhealthy { reason: String },
}

impl GroupStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::DryRun => "dry-run",
            Self::NoChanges => "no changes",
            Self::Blocked { .. } => "blocked",
            Self::Failed { .. } => "failed",
            Self::Unhealthy { .. } => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupCounts {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub disappeared: usize,
    pub renamed: usize,
}

impl GroupCounts {
    fn of(cs: &ChangeSet) -> Self {
        Self {
            new: cs.new.len(),
            updated: cs.updated.len(),
            unchanged: cs.unchanged,
            disappeared: cs.disappearance_candidates.len(),
            renamed: cs.rename_pairs.len(),
        }
    }
}

/// Structured result for one provider group.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub provider: String,
    pub status: GroupStatus,
    /// Counts after any reviewer exclusions.
    pub counts: GroupCounts,
    pub risk: RiskAssessment,
    /// The pull request must be a draft because of this group.
    pub draft: bool,
    pub change_set: Option<ChangeSet>,
    pub review: Option<ReviewOutcome>,
    pub validation: ValidationReport,
    /// Non-fatal problems worth surfacing, such as a reviewer failure.
    pub warnings: Vec<String>,
    pub files_written: usize,
    /// At least one previously absent record file was created.
    pub new_written: bool,
}

impl GroupOutcome {
    fn new(provider: &str, status: GroupStatus) -> Self {
        Self {
            provider: provider.to_string(),
            status,
            counts: GroupCounts::default(),
            risk: RiskAssessment::default(),
            draft: false,
            change_set: None,
            review: None,
            validation: ValidationReport::default(),
            warnings: Vec::new(),
            files_written: 0,
            new_written: false,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.change_set.as_ref().is_some_and(ChangeSet::has_changes)
    }
}

/// Result of a whole pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub previous_version: CatalogVersion,
    /// Set only when the pass wrote at least one record file.
    pub new_version: Option<CatalogVersion>,
    pub manifest_written: bool,
    /// Sorted by provider name.
    pub groups: Vec<GroupOutcome>,
}

impl PassReport {
    pub fn files_written(&self) -> usize {
        self.groups.iter().map(|g| g.files_written).sum()
    }

    pub fn has_changes(&self) -> bool {
        self.groups.iter().any(GroupOutcome::has_changes)
    }

    pub fn draft(&self) -> bool {
        self.groups.iter().any(|g| g.draft)
    }

    /// Providers whose files were touched, in name order.
    pub fn written_providers(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|g| g.files_written > 0)
            .map(|g| g.provider.as_str())
            .collect()
    }

    /// Process exit code.  Source-health failures outrank policy blocks,
    /// which outrank "changes detected" (reported only in diff mode).
    pub fn exit_code(&self, diff_mode: bool) -> i32 {
        let any = |f: fn(&GroupStatus) -> bool| self.groups.iter().any(|g| f(&g.status));
        if any(|s| matches!(s, GroupStatus::Unhealthy { .. })) {
            EXIT_UNHEALTHY
        } else if any(|s| matches!(s, GroupStatus::Blocked { .. })) {
            EXIT_BLOCKED
        } else if diff_mode && self.has_changes() {
            EXIT_CHANGES
        } else {
            EXIT_OK
        }
    }
}

// ── Reconciler ───────────────────────────────────────────────────────────────

pub struct Reconciler {
    store: CatalogStore,
    options: ReconcileOptions,
    validator: Arc<dyn Validator>,
    reviewer: Option<Arc<dyn ChangeReviewer>>,
}

impl Reconciler {
    pub fn new(store: CatalogStore, options: ReconcileOptions, validator: Arc<dyn Validator>) -> Self {
        Self {
            store,
            options,
            validator,
            reviewer: None,
        }
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn ChangeReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Runs one pass over `groups`.
    ///
    /// Groups run concurrently up to `max_concurrency`; each group's record
    /// loading and writing happen on the blocking pool, so file I/O of one
    /// group never stalls another.  A failing or panicking group is reported
    /// in its own outcome and never stops its siblings.  The version bump and manifest regeneration happen once,
    /// sequentially, after every group has finished.
    pub async fn run(&self, groups: Vec<GroupInput>) -> Result<PassReport> {
        let _lock = if self.options.dry_run {
            None
        } else {
            Some(self.store.lock()?)
        };

        let previous_version = self
            .store
            .read_version()
            .context("catalog version is unreadable; refusing to reconcile")?;
        let stamp = UpdaterStamp::now(&self.options.sources);

        info!(
            groups = groups.len(),
            version = %previous_version,
            dry_run = self.options.dry_run,
            "reconciliation pass started"
        );

        let mut outcomes: Vec<GroupOutcome> = stream::iter(groups)
            .map(|input| {
                let provider = input.provider.clone();
                AssertUnwindSafe(self.reconcile_group(input, &stamp))
                    .catch_unwind()
                    .map(move |result| {
                        result.unwrap_or_else(|_| {
                            error!(provider = %provider, "group pipeline panicked");
                            GroupOutcome::new(
                                &provider,
                                GroupStatus::Failed {
                                    error: "group pipeline panicked".to_string(),
                                },
                            )
                        })
                    })
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.provider.cmp(&b.provider));

        let mut report = PassReport {
            previous_version,
            new_version: None,
            manifest_written: false,
            groups: outcomes,
        };

        if report.files_written() > 0 {
            let had_new = report.groups.iter().any(|g| g.new_written);
            let next = previous_version
                .advance(had_new)
                .context("advancing catalog version")?;
            self.store
                .write_version(next)
                .context("writing catalog version")?;
            let manifest = build_manifest(&self.store, next, Utc::now())
                .context("building manifest")?;
            write_manifest(&self.store, &manifest).context("writing manifest")?;
            info!(from = %previous_version, to = %next, had_new, "catalog version advanced");
            report.new_version = Some(next);
            report.manifest_written = true;
        }

        Ok(report)
    }

    async fn reconcile_group(&self, input: GroupInput, stamp: &UpdaterStamp) -> GroupOutcome {
        let provider = input.provider;
        let discovered = match input.discovery {
            Discovery::Found(models) => models,
            Discovery::Unhealthy(reason) => {
                warn!(provider = %provider, %reason, "source unhealthy, group skipped");
                return GroupOutcome::new(&provider, GroupStatus::Unhealthy { reason });
            }
            Discovery::Failed(error) => {
                warn!(provider = %provider, %error, "discovery failed, group skipped");
                return GroupOutcome::new(&provider, GroupStatus::Failed { error });
            }
        };

        let store = self.store.clone();
        let name = provider.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load_provider(&name)).await;
        let existing = match loaded {
            Ok(Ok(snapshot)) => snapshot.records,
            Ok(Err(err)) => {
                error!(provider = %provider, error = %err, "failed to load stored records");
                return GroupOutcome::new(
                    &provider,
                    GroupStatus::Failed {
                        error: err.to_string(),
                    },
                );
            }
            Err(err) => {
                error!(provider = %provider, error = %err, "record loading task failed");
                return GroupOutcome::new(
                    &provider,
                    GroupStatus::Failed {
                        error: format!("loading records: {err}"),
                    },
                );
            }
        };

        let mut cs = diff::compute(&provider, &discovered, &existing, self.options.compare);
        let mut outcome = GroupOutcome::new(&provider, GroupStatus::NoChanges);
        outcome.risk = risk::assess(&cs, &self.options.thresholds);
        outcome.draft = outcome.risk.needs_review;
        outcome.counts = GroupCounts::of(&cs);

        info!(
            provider = %provider,
            new = outcome.counts.new,
            updated = outcome.counts.updated,
            unchanged = outcome.counts.unchanged,
            disappeared = outcome.counts.disappeared,
            renamed = outcome.counts.renamed,
            needs_review = outcome.risk.needs_review,
            "change set computed"
        );

        if !cs.has_writes() {
            outcome.change_set = Some(cs);
            return outcome;
        }

        if outcome.risk.needs_review && self.options.on_review == ReviewPolicy::Block {
            let reason = outcome.risk.reasons.join("; ");
            warn!(provider = %provider, %reason, "change set blocked by risk policy");
            outcome.status = GroupStatus::Blocked { reason };
            outcome.change_set = Some(cs);
            return outcome;
        }

        outcome.validation = self.validate_change_set(&cs);
        for issue in outcome.validation.warnings() {
            warn!(provider = %provider, %issue, "validation warning");
        }
        if outcome.validation.has_errors() {
            let errors = outcome.validation.errors().count();
            for issue in outcome.validation.errors() {
                error!(provider = %provider, %issue, "validation error");
            }
            outcome.status = GroupStatus::Failed {
                error: format!("validation failed with {errors} error(s)"),
            };
            outcome.change_set = Some(cs);
            return outcome;
        }

        if let Some(reviewer) = &self.reviewer {
            let request = ReviewRequest::from_change_set(&cs, self.options.compare.track_display_name);
            match reviewer.review(&request).await {
                Ok(review) => {
                    if apply_review(&mut cs, &review, self.options.on_reject) {
                        outcome.draft = true;
                    }
                    outcome.counts = GroupCounts::of(&cs);
                    outcome.review = Some(review);
                }
                Err(err) => {
                    warn!(
                        provider = %provider,
                        reviewer = %reviewer.name(),
                        error = %err,
                        "reviewer failed, continuing without its opinion"
                    );
                    outcome.warnings.push(format!("reviewer failed: {err:#}"));
                }
            }
        }

        if self.options.dry_run {
            outcome.status = GroupStatus::DryRun;
            outcome.change_set = Some(cs);
            return outcome;
        }

        let writer = SmartMergeWriter::new(self.store.clone(), self.options.compare);
        let stamp = stamp.clone();
        let name = provider.clone();
        let written = tokio::task::spawn_blocking(move || {
            let applied = apply_writes(&writer, &name, &cs, &stamp);
            (cs, applied)
        })
        .await;
        let (cs, applied) = match written {
            Ok(done) => done,
            Err(err) => {
                error!(provider = %provider, error = %err, "record write task failed");
                outcome.status = GroupStatus::Failed {
                    error: format!("writing records: {err}"),
                };
                return outcome;
            }
        };
        outcome.files_written = applied.files_written;
        outcome.new_written = applied.new_written;
        if let Some(error) = applied.error {
            outcome.status = GroupStatus::Failed { error };
            outcome.change_set = Some(cs);
            return outcome;
        }

        info!(provider = %provider, files = outcome.files_written, "group applied");
        outcome.status = if outcome.files_written > 0 {
            GroupStatus::Applied
        } else {
            GroupStatus::NoChanges
        };
        outcome.change_set = Some(cs);
        outcome
    }

    /// Checks new and updated entries in the shape they will have on disk.
    fn validate_change_set(&self, cs: &ChangeSet) -> ValidationReport {
        let mut report = ValidationReport::default();
        for model in &cs.new {
            report.extend(self.validator.validate(&model.to_record(), &model.file_name()));
        }
        for update in &cs.updated {
            let merged = update
                .discovered
                .overlay_on(&update.existing, self.options.compare.track_display_name);
            report.extend(self.validator.validate(&merged, &update.existing.file_name()));
        }
        report
    }
}

/// What one group's write stage got done before any failure.
#[derive(Debug, Default)]
struct Applied {
    files_written: usize,
    new_written: bool,
    error: Option<String>,
}

/// Writes the new and updated entries of `cs`, stopping at the first
/// failure.  Runs on the blocking pool.
fn apply_writes(
    writer: &SmartMergeWriter,
    provider: &str,
    cs: &ChangeSet,
    stamp: &UpdaterStamp,
) -> Applied {
    let mut applied = Applied::default();
    let candidates = cs
        .new
        .iter()
        .chain(cs.updated.iter().map(|u| &u.discovered));
    for candidate in candidates {
        match writer.write(provider, candidate, Some(stamp)) {
            Ok(written) if written.written => {
                applied.files_written += 1;
                applied.new_written |= written.is_new;
                debug!(provider, path = %written.path.display(), is_new = written.is_new, "record written");
            }
            Ok(_) => {}
            Err(err) => {
                error!(provider, model = %candidate.name, error = %err, "record write failed");
                applied.error = Some(err.to_string());
                break;
            }
        }
    }
    applied
}

/// Regenerates `manifest.yaml` for the current on-disk state without
/// touching the version.  Returns `false` when the existing manifest was
/// already current.
pub fn refresh_manifest(store: &CatalogStore) -> Result<bool> {
    let version = store.read_version().context("reading catalog version")?;
    let manifest = build_manifest(store, version, Utc::now())?;
    if let Some(existing) = read_manifest(store)? {
        if existing.same_content(&manifest) {
            debug!("manifest already current");
            return Ok(false);
        }
    }
    write_manifest(store, &manifest)?;
    info!(version = %version, providers = manifest.stats.total_providers, "manifest regenerated");
    Ok(true)
}

/// Groups by provider name; a convenience for callers assembling inputs.
pub fn inputs_from(found: BTreeMap<String, Vec<DiscoveredModel>>) -> Vec<GroupInput> {
    found
        .into_iter()
        .map(|(provider, models)| GroupInput::found(provider, models))
        .collect()
}
