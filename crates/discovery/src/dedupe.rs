//! Merging of candidates reported by several sources for one provider.

use std::collections::HashMap;

use keeper_catalog::DiscoveredModel;

use crate::SOURCE_API;

/// Collapses duplicate names, keeping first-seen order.
///
/// An `api` entry always beats any other source; when it replaces or
/// outranks a docs entry that carried pricing and it has none itself, the
/// docs cost is kept.  Between two entries of equal rank the first wins.
pub fn deduplicate(models: Vec<DiscoveredModel>) -> Vec<DiscoveredModel> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(models.len());
    let mut out: Vec<DiscoveredModel> = Vec::with_capacity(models.len());

    for model in models {
        let Some(&at) = index.get(&model.name) else {
            index.insert(model.name.clone(), out.len());
            out.push(model);
            continue;
        };

        let kept = &mut out[at];
        let kept_is_api = kept.discovered_by == SOURCE_API;
        let incoming_is_api = model.discovered_by == SOURCE_API;

        if kept_is_api && !incoming_is_api {
            if kept.cost().is_none() && model.cost().is_some() {
                kept.cost = model.cost;
            }
        } else if incoming_is_api && !kept_is_api {
            let docs_cost = kept.cost();
            *kept = model;
            if kept.cost().is_none() && docs_cost.is_some() {
                kept.cost = docs_cost;
            }
        }
    }
    out
}
