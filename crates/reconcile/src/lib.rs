//! Catalog reconciliation: turns freshly discovered models plus the stored
//! catalog into a minimal, reviewable set of record writes.

pub mod diff;
pub mod orchestrator;
pub mod render;
pub mod review;
pub mod risk;
pub mod validate;

pub use diff::{ChangeSet, ModelUpdate, RenamePair, compute, looks_like_dated_snapshot};
pub use orchestrator::{
    Discovery, EXIT_BLOCKED, EXIT_CHANGES, EXIT_OK, EXIT_UNHEALTHY, GroupCounts, GroupInput,
    GroupOutcome, GroupStatus, PassReport, ReconcileOptions, Reconciler, inputs_from,
    refresh_manifest,
};
pub use render::{render_pr_body, render_review_section};
pub use review::{
    ChangeReviewer, ModelVerdict, ReviewEntry, ReviewOutcome, ReviewRequest, ReviewUpdate, Verdict,
    apply_review,
};
pub use risk::{RiskAssessment, RiskThresholds, assess};
pub use validate::{Issue, SchemaValidator, Severity, ValidationReport, Validator, validate_catalog};
