//! Diff engine: discovered candidates against the stored records of one
//! provider group.

use std::collections::{BTreeMap, BTreeSet};

use keeper_catalog::{CompareOptions, DiscoveredModel, FieldChange, ModelRecord, field_changes};
use serde::Serialize;

/// Relative tolerance on `limits.max_tokens` for a rename match.
const RENAME_LIMIT_TOLERANCE: f64 = 0.10;
/// Relative tolerance on each cost component for a rename match.
const RENAME_COST_TOLERANCE: f64 = 0.20;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelUpdate {
    pub name: String,
    pub existing: ModelRecord,
    pub discovered: DiscoveredModel,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenamePair {
    pub old_name: String,
    pub new_name: String,
    pub reason: String,
}

/// Result of one reconciliation pass for one provider group.  Every list is
/// sorted by model name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub provider: String,
    pub new: Vec<DiscoveredModel>,
    pub updated: Vec<ModelUpdate>,
    /// Stored records the source no longer reports.  Never includes a record
    /// that appears as `old_name` in `rename_pairs`, nor dated snapshots.
    pub disappearance_candidates: Vec<ModelRecord>,
    pub rename_pairs: Vec<RenamePair>,
    pub unchanged: usize,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.updated.is_empty() || !self.disappearance_candidates.is_empty()
    }

    /// Count of entries that would touch a file.
    pub fn total_changed(&self) -> usize {
        self.new.len() + self.updated.len()
    }

    pub fn has_writes(&self) -> bool {
        self.total_changed() > 0
    }
}

/// Computes the change set for `provider`.
///
/// Deterministic: both inputs are processed in name order, so identical
/// inputs always produce an identical change set.  When `discovered` holds
/// the same name twice, the first occurrence wins.
pub fn compute(
    provider: &str,
    discovered: &[DiscoveredModel],
    existing: &BTreeMap<String, ModelRecord>,
    opts: CompareOptions,
) -> ChangeSet {
    let mut sorted: Vec<&DiscoveredModel> = discovered.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted.dedup_by(|later, first| later.name == first.name);

    let mut cs = ChangeSet {
        provider: provider.to_string(),
        ..ChangeSet::default()
    };
    let mut seen = BTreeSet::new();

    for d in sorted {
        seen.insert(d.name.as_str());
        match existing.get(&d.name) {
            None => cs.new.push(d.clone()),
            Some(record) => {
                let changes = field_changes(record, d, opts);
                if changes.is_empty() {
                    cs.unchanged += 1;
                } else {
                    cs.updated.push(ModelUpdate {
                        name: d.name.clone(),
                        existing: record.clone(),
                        discovered: d.clone(),
                        changes,
                    });
                }
            }
        }
    }

    let disappeared: Vec<&ModelRecord> = existing
        .iter()
        .filter(|(name, _)| !seen.contains(name.as_str()) && !looks_like_dated_snapshot(name))
        .map(|(_, record)| record)
        .collect();

    cs.rename_pairs = detect_renames(&cs.new, &disappeared);
    let renamed: BTreeSet<&str> = cs.rename_pairs.iter().map(|p| p.old_name.as_str()).collect();
    cs.disappearance_candidates = disappeared
        .into_iter()
        .filter(|r| !renamed.contains(r.name.as_str()))
        .cloned()
        .collect();

    cs
}

/// Pairs each new model with the first disappeared model, in name order,
/// that looks like its predecessor.  Each side joins at most one pair.
fn detect_renames(new: &[DiscoveredModel], disappeared: &[&ModelRecord]) -> Vec<RenamePair> {
    let mut taken = vec![false; disappeared.len()];
    let mut pairs = Vec::new();

    for candidate in new {
        let Some(family) = candidate.family_hint() else {
            continue;
        };
        let matched = disappeared
            .iter()
            .enumerate()
            .find(|(i, old)| !taken[*i] && old.family == family && similar(candidate, old));
        if let Some((i, old)) = matched {
            taken[i] = true;
            pairs.push(RenamePair {
                old_name: old.name.clone(),
                new_name: candidate.name.clone(),
                reason: format!("same family ({family}), similar limits/cost"),
            });
        }
    }
    pairs
}

fn similar(candidate: &DiscoveredModel, old: &ModelRecord) -> bool {
    if let Some(new_max) = candidate.max_tokens() {
        if !within(old.limits.max_tokens as f64, new_max as f64, RENAME_LIMIT_TOLERANCE) {
            return false;
        }
    }
    if let (Some(new_cost), Some(old_cost)) = (candidate.cost(), old.cost) {
        if !within(old_cost.input_per_1k, new_cost.input_per_1k, RENAME_COST_TOLERANCE)
            || !within(old_cost.output_per_1k, new_cost.output_per_1k, RENAME_COST_TOLERANCE)
        {
            return false;
        }
    }
    true
}

/// `|new/old - 1| <= tolerance`.  A non-positive `old` has nothing to
/// compare against and always passes.
fn within(old: f64, new: f64, tolerance: f64) -> bool {
    if old <= 0.0 {
        return true;
    }
    (new / old - 1.0).abs() <= tolerance + f64::EPSILON
}

/// Whether `name` carries a date segment marking an immutable snapshot:
/// a non-leading `-` segment of 4 or 8 digits (`gpt-4-0613`,
/// `claude-3-opus-20240229`), or a `YYYY-MM-DD` run of segments
/// (`gpt-4o-2024-08-06`).
pub fn looks_like_dated_snapshot(name: &str) -> bool {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() < 2 {
        return false;
    }
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if parts[1..].iter().any(|p| (p.len() == 4 || p.len() == 8) && digits(p)) {
        return true;
    }
    parts[1..].windows(3).any(|w| {
        w[0].len() == 4 && w[1].len() == 2 && w[2].len() == 2 && w.iter().all(|p| digits(p))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_catalog::{Cost, DiscoveredLimits, Status};

    fn record(name: &str, family: &str, max_tokens: u64) -> ModelRecord {
        let mut r = ModelRecord::named(name);
        r.family = family.to_string();
        r.status = Some(Status::Stable);
        r.limits.max_tokens = max_tokens;
        r
    }

    fn found(name: &str, family: &str, max_tokens: u64) -> DiscoveredModel {
        let mut d = DiscoveredModel::named(name);
        d.family = Some(family.to_string());
        d.limits = Some(DiscoveredLimits {
            max_tokens: Some(max_tokens),
            max_completion_tokens: None,
        });
        d
    }

    fn store(records: Vec<ModelRecord>) -> BTreeMap<String, ModelRecord> {
        records.into_iter().map(|r| (r.name.clone(), r)).collect()
    }

    #[test]
    fn classifies_new_updated_and_unchanged() {
        let existing = store(vec![
            record("gpt-4o", "gpt-4", 128_000),
            record("gpt-4o-mini", "gpt-4", 128_000),
        ]);
        let mut bumped = found("gpt-4o", "gpt-4", 256_000);
        bumped.status = Some(Status::Stable);
        let discovered = vec![
            found("o1", "o1", 200_000),
            bumped,
            found("gpt-4o-mini", "gpt-4", 128_000),
        ];

        let cs = compute("openai", &discovered, &existing, CompareOptions::default());
        assert_eq!(cs.new.len(), 1);
        assert_eq!(cs.new[0].name, "o1");
        assert_eq!(cs.updated.len(), 1);
        assert_eq!(cs.updated[0].changes[0].field, "limits.max_tokens");
        assert_eq!(cs.unchanged, 1);
        assert!(cs.disappearance_candidates.is_empty());
    }

    #[test]
    fn status_change_with_zero_cost_is_single_update() {
        let mut stored = record("gpt-4o", "", 0);
        stored.cost = Some(Cost::new(0.005, 0.015));
        let mut d = DiscoveredModel::named("gpt-4o");
        d.status = Some(Status::Beta);
        d.cost = Some(Cost::new(0.0, 0.0));

        let cs = compute("openai", &[d], &store(vec![stored]), CompareOptions::default());
        assert_eq!(cs.updated.len(), 1);
        let changes = &cs.updated[0].changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "status");
    }

    #[test]
    fn rename_replaces_disappearance() {
        let existing = store(vec![record("gpt-4o-v1", "gpt-4", 128_000)]);
        let discovered = vec![found("gpt-4o-v2", "gpt-4", 128_000)];

        let cs = compute("openai", &discovered, &existing, CompareOptions::default());
        assert_eq!(cs.new.len(), 1);
        assert_eq!(
            cs.rename_pairs,
            vec![RenamePair {
                old_name: "gpt-4o-v1".to_string(),
                new_name: "gpt-4o-v2".to_string(),
                reason: "same family (gpt-4), similar limits/cost".to_string(),
            }]
        );
        assert!(cs.disappearance_candidates.is_empty());
    }

    #[test]
    fn rename_requires_family_and_similar_limits() {
        let existing = store(vec![
            record("alpha-old", "", 8192),
            record("beta-old", "beta", 8192),
        ]);
        let discovered = vec![
            found("alpha-new", "", 8192),
            // 20% larger context is outside the 10% window.
            found("beta-new", "beta", 9830),
        ];
        let cs = compute("p", &discovered, &existing, CompareOptions::default());
        assert!(cs.rename_pairs.is_empty());
        assert_eq!(cs.disappearance_candidates.len(), 2);
    }

    #[test]
    fn rename_rejects_dissimilar_cost() {
        let mut old = record("m-old", "m", 8192);
        old.cost = Some(Cost::new(0.001, 0.002));
        let mut new = found("m-new", "m", 8192);
        new.cost = Some(Cost::new(0.0013, 0.002));
        let cs = compute("p", &[new], &store(vec![old]), CompareOptions::default());
        assert!(cs.rename_pairs.is_empty());
        assert_eq!(cs.disappearance_candidates.len(), 1);
    }

    #[test]
    fn rename_uses_inferred_family_when_none_reported() {
        let existing = store(vec![record("gpt-4o-v1", "gpt-4", 128_000)]);
        let mut listed = DiscoveredModel::named("gpt-4o-v2");
        let mut guess = DiscoveredModel::named("gpt-4o-v2");
        guess.family = Some("gpt-4".to_string());
        listed.defaults = Some(Box::new(guess));

        let cs = compute("openai", &[listed], &existing, CompareOptions::default());
        assert_eq!(cs.rename_pairs.len(), 1);
        assert_eq!(cs.rename_pairs[0].old_name, "gpt-4o-v1");
    }

    #[test]
    fn rename_pairs_are_exclusive_and_ordered() {
        let existing = store(vec![
            record("fam-a", "fam", 1000),
            record("fam-b", "fam", 1000),
            record("fam-c", "fam", 1000),
        ]);
        let discovered = vec![found("fam-y", "fam", 1000), found("fam-x", "fam", 1000)];

        let cs = compute("p", &discovered, &existing, CompareOptions::default());
        let pairs: Vec<(&str, &str)> = cs
            .rename_pairs
            .iter()
            .map(|p| (p.old_name.as_str(), p.new_name.as_str()))
            .collect();
        assert_eq!(pairs, vec![("fam-a", "fam-x"), ("fam-b", "fam-y")]);
        let left: Vec<&str> = cs
            .disappearance_candidates
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(left, vec!["fam-c"]);
    }

    #[test]
    fn renamed_names_never_appear_as_disappearances() {
        // Mix of families, limits and costs; the invariant must hold for all.
        let families = ["x", "y", ""];
        let limits = [0u64, 1000, 1050, 2000];
        let mut existing = Vec::new();
        let mut discovered = Vec::new();
        for (i, fam) in families.iter().enumerate() {
            for (j, lim) in limits.iter().enumerate() {
                existing.push(record(&format!("old-{i}{j}"), fam, *lim));
                discovered.push(found(&format!("new-{j}{i}"), fam, *lim));
            }
        }
        let cs = compute("p", &discovered, &store(existing), CompareOptions::default());
        assert!(!cs.rename_pairs.is_empty());
        for pair in &cs.rename_pairs {
            assert!(
                cs.disappearance_candidates
                    .iter()
                    .all(|r| r.name != pair.old_name),
                "{} is both renamed and disappeared",
                pair.old_name
            );
        }
    }

    #[test]
    fn dated_snapshots_never_disappear() {
        let existing = store(vec![
            record("gpt-4-0613", "gpt-4", 8192),
            record("gpt-4o-2024-08-06", "gpt-4", 128_000),
            record("claude-3-opus-20240229", "claude-3", 200_000),
            record("gpt-4-turbo", "gpt-4", 128_000),
        ]);
        let cs = compute("p", &[], &existing, CompareOptions::default());
        let names: Vec<&str> = cs
            .disappearance_candidates
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["gpt-4-turbo"]);
    }

    #[test]
    fn snapshot_shapes() {
        assert!(looks_like_dated_snapshot("gpt-4-0613"));
        assert!(looks_like_dated_snapshot("claude-3-5-sonnet-20241022"));
        assert!(looks_like_dated_snapshot("gpt-4o-2024-05-13"));
        assert!(!looks_like_dated_snapshot("2024-model"));
        assert!(!looks_like_dated_snapshot("gpt-4o"));
        assert!(!looks_like_dated_snapshot("llama-3-70b"));
        assert!(!looks_like_dated_snapshot("model-12345"));
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let existing = store(vec![
            record("a-old", "a", 1000),
            record("b-old", "b", 1000),
            record("keep", "k", 1000),
        ]);
        let forward = vec![
            found("a-new", "a", 1000),
            found("b-new", "b", 1000),
            found("keep", "k", 2000),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let one = compute("p", &forward, &existing, CompareOptions::default());
        let two = compute("p", &backward, &existing, CompareOptions::default());
        assert_eq!(one, two);
    }

    #[test]
    fn duplicate_discoveries_collapse_to_first() {
        let mut first = found("m", "fam", 1000);
        first.status = Some(Status::Beta);
        let mut second = found("m", "fam", 1000);
        second.status = Some(Status::Deprecated);
        let cs = compute("p", &[first, second], &BTreeMap::new(), CompareOptions::default());
        assert_eq!(cs.new.len(), 1);
        assert_eq!(cs.new[0].status, Some(Status::Beta));
    }

    #[test]
    fn has_changes_counts_disappearances() {
        let existing = store(vec![record("gone", "", 1000)]);
        let cs = compute("p", &[], &existing, CompareOptions::default());
        assert!(cs.has_changes());
        assert!(!cs.has_writes());
    }
}
