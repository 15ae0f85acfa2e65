//! Schema and range checks for record payloads.

use std::collections::BTreeMap;
use std::fmt;

use keeper_catalog::{ModelRecord, ProviderSnapshot, record_file_name};
use serde::Serialize;

const KNOWN_CAPABILITIES: &[&str] = &[
    "chat",
    "completions",
    "embeddings",
    "function_calling",
    "vision",
    "streaming",
    "fine_tuning",
    "extended_thinking",
    "computer_use",
    "reasoning",
    "coding",
    "rerank",
];

const KNOWN_MODALITIES: &[&str] = &["text", "image", "audio", "video", "embedding"];

const MAX_PRICE_PER_1K: f64 = 0.10;
const MAX_CONTEXT_TOKENS: u64 = 2_000_000;
const MIN_CONTEXT_TOKENS: u64 = 1024;
const MIN_EMBEDDING_CONTEXT_TOKENS: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks the write.
    Error,
    /// Reported in the pull request body only.
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub model: String,
    pub field: String,
    pub message: String,
}

impl Issue {
    fn error(model: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            model: model.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn warning(model: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            model: model.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        write!(f, "[{sev}] {}: {}: {}", self.model, self.field, self.message)
    }
}

/// Rule checker consulted before any record is written.
pub trait Validator: Send + Sync {
    /// Issues for `record` as it would be stored under `file_name`.
    fn validate(&self, record: &ModelRecord, file_name: &str) -> Vec<Issue>;
}

/// The catalog's schema rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl Validator for SchemaValidator {
    fn validate(&self, m: &ModelRecord, file_name: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        let who = if m.name.is_empty() { file_name } else { m.name.as_str() };

        // Required fields
        if m.name.is_empty() {
            issues.push(Issue::error(who, "name", "required field is empty"));
        }
        if m.display_name.is_empty() {
            issues.push(Issue::error(who, "display_name", "required field is empty"));
        }
        if m.status.as_ref().is_none_or(|s| s.as_str().is_empty()) {
            issues.push(Issue::error(who, "status", "required field is empty"));
        }
        if m.limits.max_tokens == 0 {
            issues.push(Issue::error(who, "limits.max_tokens", "required field is zero"));
        }
        if m.capabilities.is_empty() {
            issues.push(Issue::error(who, "capabilities", "at least one capability required"));
        }
        if m.modalities.input.is_empty() {
            issues.push(Issue::error(
                who,
                "modalities.input",
                "at least one input modality required",
            ));
        }
        if m.modalities.output.is_empty() {
            issues.push(Issue::error(
                who,
                "modalities.output",
                "at least one output modality required",
            ));
        }

        if !m.name.is_empty() && !file_name.is_empty() {
            let actual = file_name.rsplit('/').next().unwrap_or(file_name);
            let expected = record_file_name(&m.name);
            if actual != expected {
                issues.push(Issue::error(
                    who,
                    "name",
                    format!("file name {actual:?} does not match name {:?} (expected {expected:?})", m.name),
                ));
            }
        }

        if let Some(status) = &m.status {
            if !status.is_known() && !status.as_str().is_empty() {
                issues.push(Issue::warning(
                    who,
                    "status",
                    format!(
                        "unknown status {:?}, expected one of: stable, beta, preview, deprecated",
                        status.as_str()
                    ),
                ));
            }
        }

        let embedding = m.is_embedding();

        if let Some(cost) = m.cost {
            for (field, value) in [
                ("cost.input_per_1k", cost.input_per_1k),
                ("cost.output_per_1k", cost.output_per_1k),
            ] {
                if !(0.0..=MAX_PRICE_PER_1K).contains(&value) {
                    issues.push(Issue::error(
                        who,
                        field,
                        format!("value {value:.6} outside expected range [0, {MAX_PRICE_PER_1K:.2}]"),
                    ));
                }
            }
            if !embedding && cost.output_per_1k == 0.0 {
                issues.push(Issue::warning(
                    who,
                    "cost.output_per_1k",
                    "non-embedding model has zero output cost",
                ));
            }
        }

        if m.limits.max_tokens > 0 {
            let min = if embedding {
                MIN_EMBEDDING_CONTEXT_TOKENS
            } else {
                MIN_CONTEXT_TOKENS
            };
            if !(min..=MAX_CONTEXT_TOKENS).contains(&m.limits.max_tokens) {
                issues.push(Issue::error(
                    who,
                    "limits.max_tokens",
                    format!(
                        "value {} outside expected range [{min}, {MAX_CONTEXT_TOKENS}]",
                        m.limits.max_tokens
                    ),
                ));
            }
        }
        if m.limits.max_completion_tokens > m.limits.max_tokens {
            issues.push(Issue::error(
                who,
                "limits.max_completion_tokens",
                format!(
                    "value {} exceeds max_tokens {}",
                    m.limits.max_completion_tokens, m.limits.max_tokens
                ),
            ));
        }

        for cap in &m.capabilities {
            if !KNOWN_CAPABILITIES.contains(&cap.as_str()) {
                issues.push(Issue::warning(who, "capabilities", format!("unknown capability {cap:?}")));
            }
        }
        for (field, tags) in [
            ("modalities.input", &m.modalities.input),
            ("modalities.output", &m.modalities.output),
        ] {
            for tag in tags {
                if !KNOWN_MODALITIES.contains(&tag.as_str()) {
                    issues.push(Issue::warning(who, field, format!("unknown modality {tag:?}")));
                }
            }
        }

        issues
    }
}

/// Issues collected across many records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(Issue::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| !i.is_error())
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Validation passed: no issues found.");
        }
        let errors: Vec<_> = self.errors().collect();
        let warnings: Vec<_> = self.warnings().collect();
        if !errors.is_empty() {
            writeln!(f, "Errors ({}):", errors.len())?;
            for issue in errors {
                writeln!(f, "  {issue}")?;
            }
        }
        if !warnings.is_empty() {
            writeln!(f, "Warnings ({}):", warnings.len())?;
            for issue in warnings {
                writeln!(f, "  {issue}")?;
            }
        }
        Ok(())
    }
}

/// Validates every stored record against the file it was loaded from.
pub fn validate_catalog(
    validator: &dyn Validator,
    providers: &BTreeMap<String, ProviderSnapshot>,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    for (provider, snapshot) in providers {
        for record in snapshot.records.values() {
            let file_name = snapshot
                .file_names
                .get(&record.name)
                .cloned()
                .unwrap_or_else(|| record.file_name());
            let file = format!("providers/{provider}/models/{file_name}");
            report.extend(validator.validate(record, &file));
        }
    }
    report
}
