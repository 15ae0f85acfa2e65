//! Optional second-opinion review of a change set before it is written.
//!
//! The reconciler only knows the [`ChangeReviewer`] seam; the LLM-backed
//! implementation lives in `keeper-llm`.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use keeper_catalog::{DiscoveredModel, FieldValue, ModelRecord};
use keeper_config::RejectPolicy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::diff::ChangeSet;

// ── Request ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryLimits {
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub max_completion_tokens: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryModalities {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryCost {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// The state of one model as the reviewer sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewEntry {
    pub name: String,
    pub family: String,
    pub status: String,
    pub capabilities: Vec<String>,
    pub modalities: EntryModalities,
    pub limits: EntryLimits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<EntryCost>,
}

impl From<&ModelRecord> for ReviewEntry {
    fn from(r: &ModelRecord) -> Self {
        Self {
            name: r.name.clone(),
            family: r.family.clone(),
            status: r.status.as_ref().map(|s| s.as_str().to_string()).unwrap_or_default(),
            capabilities: r.capabilities.clone(),
            modalities: EntryModalities {
                input: r.modalities.input.clone(),
                output: r.modalities.output.clone(),
            },
            limits: EntryLimits {
                max_tokens: r.limits.max_tokens,
                max_completion_tokens: r.limits.max_completion_tokens,
            },
            cost: r.cost.map(|c| EntryCost {
                input_per_1k: c.input_per_1k,
                output_per_1k: c.output_per_1k,
            }),
        }
    }
}

impl From<&DiscoveredModel> for ReviewEntry {
    fn from(d: &DiscoveredModel) -> Self {
        Self::from(&d.to_record())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewChange {
    pub field: String,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewUpdate {
    pub name: String,
    pub changes: Vec<ReviewChange>,
    /// The record as it would look after the write.
    pub current_state: ReviewEntry,
}

/// What a reviewer is asked to judge: one provider's new and updated
/// entries.  Disappearances are never reviewed since nothing is written
/// for them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewRequest {
    pub provider: String,
    pub new: Vec<ReviewEntry>,
    pub updated: Vec<ReviewUpdate>,
}

impl ReviewRequest {
    pub fn from_change_set(cs: &ChangeSet, track_display_name: bool) -> Self {
        let new = cs.new.iter().map(ReviewEntry::from).collect();
        let updated = cs
            .updated
            .iter()
            .map(|u| ReviewUpdate {
                name: u.name.clone(),
                changes: u
                    .changes
                    .iter()
                    .map(|c| ReviewChange {
                        field: c.field.clone(),
                        old_value: c.old.clone(),
                        new_value: c.new.clone(),
                    })
                    .collect(),
                current_state: ReviewEntry::from(
                    &u.discovered.overlay_on(&u.existing, track_display_name),
                ),
            })
            .collect();
        Self {
            provider: cs.provider.clone(),
            new,
            updated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty()
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Flag,
    Reject,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Flag => "flag",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub model_name: String,
    pub verdict: Verdict,
    /// Always within `0.0..=1.0`.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    #[serde(default)]
    pub verdicts: Vec<ModelVerdict>,
}

impl ReviewOutcome {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.verdicts.iter().filter(|v| v.verdict == verdict).count()
    }

    pub fn has_rejections(&self) -> bool {
        self.count(Verdict::Reject) > 0
    }

    pub fn has_flags(&self) -> bool {
        self.count(Verdict::Flag) > 0
    }

    pub fn rejected_names(&self) -> BTreeSet<&str> {
        self.verdicts
            .iter()
            .filter(|v| v.verdict == Verdict::Reject)
            .map(|v| v.model_name.as_str())
            .collect()
    }
}

#[async_trait]
pub trait ChangeReviewer: Send + Sync {
    /// Short label for logs, e.g. `anthropic/claude-sonnet-4-20250514`.
    fn name(&self) -> String;

    async fn review(&self, request: &ReviewRequest) -> anyhow::Result<ReviewOutcome>;
}

/// Applies a review to `cs` and reports whether the resulting pull request
/// must be opened as a draft.
///
/// Any flag forces a draft.  Rejections force a draft under
/// [`RejectPolicy::Draft`]; under [`RejectPolicy::Exclude`] the rejected
/// entries are dropped from `new` and `updated` instead.
pub fn apply_review(cs: &mut ChangeSet, outcome: &ReviewOutcome, policy: RejectPolicy) -> bool {
    let mut force_draft = outcome.has_flags();
    if !outcome.has_rejections() {
        return force_draft;
    }

    match policy {
        RejectPolicy::Draft => force_draft = true,
        RejectPolicy::Exclude => {
            let rejected = outcome.rejected_names();
            let before = cs.total_changed();
            cs.new.retain(|m| !rejected.contains(m.name.as_str()));
            cs.updated.retain(|u| !rejected.contains(u.name.as_str()));
            info!(
                provider = %cs.provider,
                excluded = before - cs.total_changed(),
                "reviewer rejections excluded"
            );
        }
    }
    force_draft
}
