//! Risk gate: decides whether a change set needs a human before it lands.

use keeper_config::RiskConfig;
use serde::Serialize;

use crate::diff::ChangeSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    /// New plus updated entries above which review is needed.
    pub max_changed: usize,
    pub max_disappeared: usize,
    /// Relative movement of a cost component above which review is needed.
    pub max_price_delta: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            max_changed: 25,
            max_disappeared: 3,
            max_price_delta: 0.35,
        }
    }
}

impl From<&RiskConfig> for RiskThresholds {
    fn from(cfg: &RiskConfig) -> Self {
        Self {
            max_changed: cfg.max_changed,
            max_disappeared: cfg.max_disappeared,
            max_price_delta: cfg.max_price_delta,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub needs_review: bool,
    /// One line per tripped gate, for logs and the pull request body.
    pub reasons: Vec<String>,
}

/// Classifies `cs`.  Pure: never mutates the change set and never fails.
pub fn assess(cs: &ChangeSet, limits: &RiskThresholds) -> RiskAssessment {
    let mut reasons = Vec::new();

    let changed = cs.total_changed();
    if changed > limits.max_changed {
        reasons.push(format!(
            "{changed} models changed (more than {})",
            limits.max_changed
        ));
    }

    let disappeared = cs.disappearance_candidates.len();
    if disappeared > limits.max_disappeared {
        reasons.push(format!(
            "{disappeared} models no longer reported (more than {})",
            limits.max_disappeared
        ));
    }

    for update in &cs.updated {
        for change in update.changes.iter().filter(|c| c.is_cost()) {
            let (Some(old), Some(new)) = (change.old.as_price(), change.new.as_price()) else {
                continue;
            };
            if old <= 0.0 {
                continue;
            }
            let delta = (new - old) / old;
            if delta.abs() > limits.max_price_delta || new > old * 2.0 {
                reasons.push(format!(
                    "{} {} moved {:+.0}% ({old} → {new})",
                    update.name,
                    change.field,
                    delta * 100.0
                ));
            }
        }
    }

    RiskAssessment {
        needs_review: !reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute;
    use keeper_catalog::{CompareOptions, Cost, DiscoveredModel, ModelRecord};
    use std::collections::BTreeMap;

    fn priced(name: &str, input: f64, output: f64) -> ModelRecord {
        let mut r = ModelRecord::named(name);
        r.cost = Some(Cost::new(input, output));
        r
    }

    fn repriced(name: &str, input: f64, output: f64) -> DiscoveredModel {
        let mut d = DiscoveredModel::named(name);
        d.cost = Some(Cost::new(input, output));
        d
    }

    fn assess_one(existing: Vec<ModelRecord>, discovered: Vec<DiscoveredModel>) -> RiskAssessment {
        let existing: BTreeMap<_, _> = existing.into_iter().map(|r| (r.name.clone(), r)).collect();
        let cs = compute("p", &discovered, &existing, CompareOptions::default());
        assess(&cs, &RiskThresholds::default())
    }

    #[test]
    fn twenty_six_new_models_need_review() {
        let discovered: Vec<_> = (0..26).map(|i| DiscoveredModel::named(format!("m{i:02}"))).collect();
        let risk = assess_one(vec![], discovered);
        assert!(risk.needs_review);
        assert_eq!(risk.reasons.len(), 1);
    }

    #[test]
    fn twenty_five_new_models_pass() {
        let discovered: Vec<_> = (0..25).map(|i| DiscoveredModel::named(format!("m{i:02}"))).collect();
        assert!(!assess_one(vec![], discovered).needs_review);
    }

    #[test]
    fn more_than_three_disappearances_need_review() {
        let existing: Vec<_> = (0..4).map(|i| ModelRecord::named(format!("gone{i}"))).collect();
        assert!(assess_one(existing, vec![]).needs_review);
        let existing: Vec<_> = (0..3).map(|i| ModelRecord::named(format!("gone{i}"))).collect();
        assert!(!assess_one(existing, vec![]).needs_review);
    }

    #[test]
    fn large_price_moves_need_review() {
        // 40% cut on input.
        let risk = assess_one(vec![priced("m", 0.01, 0.03)], vec![repriced("m", 0.006, 0.03)]);
        assert!(risk.needs_review);
        assert!(risk.reasons[0].contains("cost.input_per_1k"), "{:?}", risk.reasons);

        // 30% rise stays under the gate.
        let risk = assess_one(vec![priced("m", 0.01, 0.03)], vec![repriced("m", 0.013, 0.03)]);
        assert!(!risk.needs_review);
    }

    #[test]
    fn price_from_zero_is_not_a_delta() {
        let risk = assess_one(vec![priced("m", 0.0, 0.03)], vec![repriced("m", 0.5, 0.03)]);
        assert!(!risk.needs_review);
    }

    #[test]
    fn first_cost_on_unpriced_record_is_not_a_delta() {
        let risk = assess_one(vec![ModelRecord::named("m")], vec![repriced("m", 0.5, 0.9)]);
        assert!(!risk.needs_review);
    }

    #[test]
    fn custom_thresholds_apply() {
        let discovered: Vec<_> = (0..3).map(|i| DiscoveredModel::named(format!("m{i}"))).collect();
        let cs = compute("p", &discovered, &BTreeMap::new(), CompareOptions::default());
        let strict = RiskThresholds {
            max_changed: 2,
            ..RiskThresholds::default()
        };
        assert!(assess(&cs, &strict).needs_review);
    }
}
