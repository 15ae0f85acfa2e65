//! Markdown rendering of a pass for pull request bodies and terminal
//! summaries.

use std::fmt::Write as _;

use crate::orchestrator::{GroupOutcome, PassReport};
use crate::review::{ModelVerdict, ReviewOutcome, Verdict};

/// Full pull request body: a summary table followed by one section per
/// provider that has something to say.
pub fn render_pr_body(report: &PassReport) -> String {
    let mut b = String::new();
    b.push_str("## Catalog sync\n\n");
    match report.new_version {
        Some(next) => {
            let _ = writeln!(b, "Catalog version: `{}` → `{next}`\n", report.previous_version);
        }
        None => {
            let _ = writeln!(b, "Catalog version: `{}` (unchanged)\n", report.previous_version);
        }
    }

    b.push_str("| Provider | Status | New | Updated | Unchanged | Disappeared | Renamed |\n");
    b.push_str("|----------|--------|-----|---------|-----------|-------------|---------|\n");
    for g in &report.groups {
        let c = g.counts;
        let _ = writeln!(
            b,
            "| {} | {} | {} | {} | {} | {} | {} |",
            g.provider,
            g.status.label(),
            c.new,
            c.updated,
            c.unchanged,
            c.disappeared,
            c.renamed
        );
    }
    b.push('\n');

    if report.draft() {
        b.push_str("> [!WARNING]\n> This pull request needs human review before merging.\n\n");
    }

    for g in &report.groups {
        b.push_str(&render_group(g));
    }
    b
}

fn render_group(g: &GroupOutcome) -> String {
    let mut b = String::new();
    let Some(cs) = &g.change_set else {
        return b;
    };
    if !cs.has_changes() && g.risk.reasons.is_empty() && g.warnings.is_empty() {
        return b;
    }

    let _ = writeln!(b, "### {}\n", g.provider);

    if !g.risk.reasons.is_empty() {
        b.push_str("**Needs review:**\n\n");
        for reason in &g.risk.reasons {
            let _ = writeln!(b, "- {reason}");
        }
        b.push('\n');
    }

    if !cs.new.is_empty() {
        b.push_str("**New models:**\n\n");
        for m in &cs.new {
            match m.family_hint() {
                Some(family) => {
                    let _ = writeln!(b, "- `{}` ({family})", m.name);
                }
                None => {
                    let _ = writeln!(b, "- `{}`", m.name);
                }
            }
        }
        b.push('\n');
    }

    if !cs.updated.is_empty() {
        b.push_str("**Updated models:**\n\n");
        for u in &cs.updated {
            let _ = writeln!(b, "- `{}`", u.name);
            for change in &u.changes {
                let _ = writeln!(b, "  - {change}");
            }
        }
        b.push('\n');
    }

    if !cs.rename_pairs.is_empty() {
        b.push_str("**Possible renames:**\n\n");
        for r in &cs.rename_pairs {
            let _ = writeln!(b, "- `{}` → `{}`: {}", r.old_name, r.new_name, r.reason);
        }
        b.push('\n');
    }

    if !cs.disappearance_candidates.is_empty() {
        b.push_str("**No longer reported** (kept in the catalog, remove manually if retired):\n\n");
        for r in &cs.disappearance_candidates {
            let _ = writeln!(b, "- `{}`", r.name);
        }
        b.push('\n');
    }

    for warning in &g.warnings {
        let _ = writeln!(b, "> {warning}\n");
    }

    if let Some(review) = &g.review {
        b.push_str(&render_review_section(review));
    }
    b
}

/// Reviewer summary.  Empty when every verdict was an approval.
pub fn render_review_section(outcome: &ReviewOutcome) -> String {
    let flagged: Vec<&ModelVerdict> = outcome
        .verdicts
        .iter()
        .filter(|v| v.verdict == Verdict::Flag)
        .collect();
    let rejected: Vec<&ModelVerdict> = outcome
        .verdicts
        .iter()
        .filter(|v| v.verdict == Verdict::Reject)
        .collect();
    if flagged.is_empty() && rejected.is_empty() {
        return String::new();
    }

    let mut b = String::from("### LLM Judge Review\n\n");
    let approved = outcome.verdicts.len() - flagged.len() - rejected.len();
    let _ = writeln!(
        b,
        "**{approved}** approved, **{}** flagged, **{}** rejected\n",
        flagged.len(),
        rejected.len()
    );
    verdict_table(&mut b, "Rejected Models", &rejected);
    verdict_table(&mut b, "Flagged Models", &flagged);
    b
}

fn verdict_table(b: &mut String, title: &str, verdicts: &[&ModelVerdict]) {
    if verdicts.is_empty() {
        return;
    }
    let _ = writeln!(b, "<details>\n<summary>{title}</summary>\n");
    b.push_str("| Model | Confidence | Concerns | Reasoning |\n");
    b.push_str("|-------|-----------|----------|----------|\n");
    for v in verdicts {
        let _ = writeln!(
            b,
            "| `{}` | {:.0}% | {} | {} |",
            v.model_name,
            v.confidence * 100.0,
            cell(&v.concerns.join("; ")),
            cell(&v.reasoning)
        );
    }
    b.push_str("\n</details>\n\n");
}

/// Keeps free text from breaking a table row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute;
    use crate::orchestrator::{GroupCounts, GroupStatus};
    use crate::risk::RiskAssessment;
    use crate::validate::ValidationReport;
    use keeper_catalog::{CatalogVersion, CompareOptions, DiscoveredModel, ModelRecord, Status};
    use std::collections::BTreeMap;

    fn verdict(name: &str, verdict: Verdict, concerns: &[&str]) -> ModelVerdict {
        ModelVerdict {
            model_name: name.to_string(),
            verdict,
            confidence: 0.8,
            concerns: concerns.iter().map(|c| c.to_string()).collect(),
            reasoning: "looks off".to_string(),
        }
    }

    fn report() -> PassReport {
        let mut stored = ModelRecord::named("gpt-4o");
        stored.status = Some(Status::Stable);
        let existing = BTreeMap::from([
            (stored.name.clone(), stored),
            ("old-model".to_string(), ModelRecord::named("old-model")),
        ]);
        let mut changed = DiscoveredModel::named("gpt-4o");
        changed.status = Some(Status::Beta);
        let cs = compute(
            "openai",
            &[changed, DiscoveredModel::named("gpt-5")],
            &existing,
            CompareOptions::default(),
        );

        PassReport {
            previous_version: CatalogVersion::new(1, 4, 2),
            new_version: Some(CatalogVersion::new(1, 5, 0)),
            manifest_written: true,
            groups: vec![GroupOutcome {
                provider: "openai".to_string(),
                status: GroupStatus::Applied,
                counts: GroupCounts {
                    new: 1,
                    updated: 1,
                    unchanged: 0,
                    disappeared: 1,
                    renamed: 0,
                },
                risk: RiskAssessment::default(),
                draft: false,
                change_set: Some(cs),
                review: None,
                validation: ValidationReport::default(),
                warnings: vec![],
                files_written: 2,
                new_written: true,
            }],
        }
    }

    #[test]
    fn pr_body_lists_every_kind_of_change() {
        let body = render_pr_body(&report());
        assert!(body.contains("`1.4.2` → `1.5.0`"));
        assert!(body.contains("| openai | applied | 1 | 1 | 0 | 1 | 0 |"));
        assert!(body.contains("- `gpt-5`"));
        assert!(body.contains("  - status: stable → beta"));
        assert!(body.contains("- `old-model`"));
        assert!(!body.contains("needs human review"));
    }

    #[test]
    fn draft_reports_carry_a_warning() {
        let mut report = report();
        report.groups[0].draft = true;
        assert!(render_pr_body(&report).contains("needs human review"));
    }

    #[test]
    fn review_section_empty_when_all_approved() {
        let outcome = ReviewOutcome {
            verdicts: vec![verdict("a", Verdict::Approve, &[])],
        };
        assert_eq!(render_review_section(&outcome), "");
    }

    #[test]
    fn review_section_tabulates_flags_and_rejections() {
        let outcome = ReviewOutcome {
            verdicts: vec![
                verdict("a", Verdict::Approve, &[]),
                verdict("b", Verdict::Flag, &["price | high"]),
                verdict("c", Verdict::Reject, &["chat on embedding", "bad limits"]),
            ],
        };
        let section = render_review_section(&outcome);
        assert!(section.starts_with("### LLM Judge Review\n\n"));
        assert!(section.contains("**1** approved, **1** flagged, **1** rejected"));
        assert!(section.contains("<summary>Rejected Models</summary>"));
        assert!(section.contains("| `c` | 80% | chat on embedding; bad limits | looks off |"));
        assert!(section.contains("price \\| high"));
        assert!(section.find("Rejected").unwrap() < section.find("Flagged").unwrap());
    }
}
