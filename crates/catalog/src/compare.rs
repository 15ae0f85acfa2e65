//! Field-level comparison between a stored record and a discovered candidate.
//!
//! Shared by the diff engine (to classify a candidate as updated/unchanged)
//! and by the smart-merge writer (to decide whether a file needs rewriting),
//! so both always agree on what counts as a change.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::model::{Cost, DiscoveredModel, ModelRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    /// Report `display_name` drift.  Off by default: the stored label is
    /// authoritative.
    pub track_display_name: bool,
}

/// A value on either side of a [`FieldChange`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Absent,
    Text(String),
    Price(f64),
    Count(u64),
    Tags(Vec<String>),
    Cost(Cost),
}

impl FieldValue {
    pub fn as_price(&self) -> Option<f64> {
        match self {
            FieldValue::Price(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Absent => f.write_str("(none)"),
            FieldValue::Text(s) if s.is_empty() => f.write_str("(empty)"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Price(v) => write!(f, "{v}"),
            FieldValue::Count(v) => write!(f, "{v}"),
            FieldValue::Tags(tags) => write!(f, "[{}]", tags.join(", ")),
            FieldValue::Cost(c) => write!(f, "{}/{}", c.input_per_1k, c.output_per_1k),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: FieldValue,
    pub new: FieldValue,
}

impl FieldChange {
    fn new(field: &str, old: FieldValue, new: FieldValue) -> Self {
        Self {
            field: field.to_string(),
            old,
            new,
        }
    }

    pub fn is_cost(&self) -> bool {
        self.field == "cost" || self.field.starts_with("cost.")
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} → {}", self.field, self.old, self.new)
    }
}

/// True when the two tag lists differ as sets.  Order and duplicates are
/// ignored; additions and removals both count.
pub fn tag_sets_differ(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a != b
}

/// Every authoritative attribute where `discovered` has an opinion that
/// disagrees with `existing`, in a fixed field order.
pub fn field_changes(
    existing: &ModelRecord,
    discovered: &DiscoveredModel,
    opts: CompareOptions,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if opts.track_display_name {
        if let Some(label) = discovered.display_name() {
            if label != existing.display_name {
                changes.push(FieldChange::new(
                    "display_name",
                    FieldValue::Text(existing.display_name.clone()),
                    FieldValue::Text(label.to_string()),
                ));
            }
        }
    }

    if let Some(family) = discovered.family() {
        if family != existing.family {
            changes.push(FieldChange::new(
                "family",
                FieldValue::Text(existing.family.clone()),
                FieldValue::Text(family.to_string()),
            ));
        }
    }

    if let Some(status) = discovered.status() {
        if existing.status.as_ref() != Some(status) {
            let old = existing
                .status
                .as_ref()
                .map(|s| FieldValue::Text(s.to_string()))
                .unwrap_or(FieldValue::Absent);
            changes.push(FieldChange::new(
                "status",
                old,
                FieldValue::Text(status.to_string()),
            ));
        }
    }

    if let Some(cost) = discovered.cost() {
        match existing.cost {
            None => changes.push(FieldChange::new(
                "cost",
                FieldValue::Absent,
                FieldValue::Cost(cost),
            )),
            Some(old) => {
                if old.input_per_1k != cost.input_per_1k {
                    changes.push(FieldChange::new(
                        "cost.input_per_1k",
                        FieldValue::Price(old.input_per_1k),
                        FieldValue::Price(cost.input_per_1k),
                    ));
                }
                if old.output_per_1k != cost.output_per_1k {
                    changes.push(FieldChange::new(
                        "cost.output_per_1k",
                        FieldValue::Price(old.output_per_1k),
                        FieldValue::Price(cost.output_per_1k),
                    ));
                }
            }
        }
    }

    if let Some(max) = discovered.max_tokens() {
        if max != existing.limits.max_tokens {
            changes.push(FieldChange::new(
                "limits.max_tokens",
                FieldValue::Count(existing.limits.max_tokens),
                FieldValue::Count(max),
            ));
        }
    }
    if let Some(max) = discovered.max_completion_tokens() {
        if max != existing.limits.max_completion_tokens {
            changes.push(FieldChange::new(
                "limits.max_completion_tokens",
                FieldValue::Count(existing.limits.max_completion_tokens),
                FieldValue::Count(max),
            ));
        }
    }

    let tag_fields: [(&str, &[String], Option<&[String]>); 3] = [
        (
            "capabilities",
            &existing.capabilities,
            discovered.capabilities(),
        ),
        (
            "modalities.input",
            &existing.modalities.input,
            discovered.input_modalities(),
        ),
        (
            "modalities.output",
            &existing.modalities.output,
            discovered.output_modalities(),
        ),
    ];
    for (field, old, new) in tag_fields {
        if let Some(new) = new {
            if tag_sets_differ(old, new) {
                changes.push(FieldChange::new(
                    field,
                    FieldValue::Tags(old.to_vec()),
                    FieldValue::Tags(new.to_vec()),
                ));
            }
        }
    }

    changes
}
