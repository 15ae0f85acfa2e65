use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Status ────────────────────────────────────────────────────────────────────

/// Lifecycle status of a model.  Values outside the known set are kept
/// verbatim so a record written by hand round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Stable,
    Beta,
    Preview,
    Deprecated,
    Other(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Stable => "stable",
            Status::Beta => "beta",
            Status::Preview => "preview",
            Status::Deprecated => "deprecated",
            Status::Other(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Status::Other(_))
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stable" => Status::Stable,
            "beta" => Status::Beta,
            "preview" => Status::Preview,
            "deprecated" => Status::Deprecated,
            _ => Status::Other(value),
        }
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        Status::from(value.to_string())
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Record parts ──────────────────────────────────────────────────────────────

/// Price per 1K tokens in USD.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cost {
    #[serde(default)]
    pub input_per_1k: f64,
    #[serde(default)]
    pub output_per_1k: f64,
}

impl Cost {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// A `{0, 0}` pair means the source had no pricing, not that the model
    /// is free.
    pub fn is_zero(&self) -> bool {
        self.input_per_1k == 0.0 && self.output_per_1k == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub max_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub max_completion_tokens: u64,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modalities {
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

/// Provenance stamp written under `x_updater` on every record a sync pass
/// creates or updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdaterStamp {
    pub last_verified_at: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl UpdaterStamp {
    pub fn now(sources: &[String]) -> Self {
        Self {
            last_verified_at: Utc::now(),
            sources: sources.to_vec(),
        }
    }
}

// ── Persisted record ──────────────────────────────────────────────────────────

/// One model file under `providers/<provider>/models/`.
///
/// Keys the engine does not recognise are collected into `extra` so a
/// load/save cycle does not lose them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub modalities: Modalities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_updater: Option<UpdaterStamp>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ModelRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: String::new(),
            family: String::new(),
            status: None,
            cost: None,
            limits: Limits::default(),
            capabilities: Vec::new(),
            modalities: Modalities::default(),
            x_updater: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn file_name(&self) -> String {
        record_file_name(&self.name)
    }

    pub fn is_embedding(&self) -> bool {
        self.capabilities.iter().any(|c| c == "embeddings")
    }
}

/// Storage file name for a model: the last `/` segment of its name,
/// lower-cased, with a `.yaml` extension.
///
/// `accounts/fireworks/models/Llama-3` becomes `llama-3.yaml`.
pub fn record_file_name(name: &str) -> String {
    let last = name.rsplit('/').next().unwrap_or(name);
    format!("{}.yaml", last.to_lowercase())
}

// ── Discovered candidate ──────────────────────────────────────────────────────

/// Limits as reported by a source; each side may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscoveredLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscoveredModalities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
}

/// A candidate value for a record as produced by one discovery pass.
///
/// `None` means the source had no opinion on that attribute.  The accessor
/// methods additionally fold "empty" encodings (zero limits, `{0,0}` cost,
/// blank strings) into `None`; the diff and merge code only ever reads
/// attributes through them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<DiscoveredLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<DiscoveredModalities>,
    /// Source tag (`api`, `docs`) of the adapter that produced the entry.
    /// Never written to disk.
    #[serde(default, skip_serializing)]
    pub discovered_by: String,
    /// Guesses that only seed a record with no file yet, such as attributes
    /// inferred from an id.  Never compared against or merged into an
    /// existing record.
    #[serde(skip)]
    pub defaults: Option<Box<DiscoveredModel>>,
}

impl DiscoveredModel {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn file_name(&self) -> String {
        record_file_name(&self.name)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref().filter(|s| !s.is_empty())
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref().filter(|s| !s.is_empty())
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref().filter(|s| !s.as_str().is_empty())
    }

    pub fn cost(&self) -> Option<Cost> {
        self.cost.filter(|c| !c.is_zero())
    }

    pub fn max_tokens(&self) -> Option<u64> {
        self.limits.and_then(|l| l.max_tokens).filter(|v| *v > 0)
    }

    pub fn max_completion_tokens(&self) -> Option<u64> {
        self.limits
            .and_then(|l| l.max_completion_tokens)
            .filter(|v| *v > 0)
    }

    pub fn capabilities(&self) -> Option<&[String]> {
        self.capabilities.as_deref()
    }

    pub fn input_modalities(&self) -> Option<&[String]> {
        self.modalities.as_ref().and_then(|m| m.input.as_deref())
    }

    pub fn output_modalities(&self) -> Option<&[String]> {
        self.modalities.as_ref().and_then(|m| m.output.as_deref())
    }

    /// Reads `attr` from the candidate, falling back to its new-record
    /// defaults.
    fn seeded<'a, T>(&'a self, attr: impl Fn(&'a DiscoveredModel) -> Option<T>) -> Option<T> {
        attr(self).or_else(|| self.defaults.as_deref().and_then(&attr))
    }

    /// Family used to pair a new model with a disappeared one.  Falls back
    /// to the inferred family when the source reported none.
    pub fn family_hint(&self) -> Option<&str> {
        self.seeded(DiscoveredModel::family)
    }

    /// Full record for a model that has no file yet.  Attributes the source
    /// did not report come from `defaults`, then take their empty values.
    pub fn to_record(&self) -> ModelRecord {
        let mut record = ModelRecord::named(&self.name);
        record.display_name = self
            .seeded(DiscoveredModel::display_name)
            .unwrap_or_default()
            .to_string();
        record.family = self.family_hint().unwrap_or_default().to_string();
        record.status = self.seeded(DiscoveredModel::status).cloned();
        record.cost = self.seeded(DiscoveredModel::cost);
        record.limits = Limits {
            max_tokens: self.seeded(DiscoveredModel::max_tokens).unwrap_or(0),
            max_completion_tokens: self
                .seeded(DiscoveredModel::max_completion_tokens)
                .unwrap_or(0),
        };
        let tags = |list: Option<&[String]>| list.map(<[String]>::to_vec).unwrap_or_default();
        record.capabilities = tags(self.seeded(DiscoveredModel::capabilities));
        record.modalities = Modalities {
            input: tags(self.seeded(DiscoveredModel::input_modalities)),
            output: tags(self.seeded(DiscoveredModel::output_modalities)),
        };
        record
    }

    /// The record as it will look on disk after this candidate is merged
    /// over `existing`.  Used to validate updates against their final shape.
    pub fn overlay_on(&self, existing: &ModelRecord, track_display_name: bool) -> ModelRecord {
        let mut record = existing.clone();
        if track_display_name {
            if let Some(v) = self.display_name() {
                record.display_name = v.to_string();
            }
        }
        if let Some(v) = self.family() {
            record.family = v.to_string();
        }
        if let Some(v) = self.status() {
            record.status = Some(v.clone());
        }
        if let Some(v) = self.cost() {
            record.cost = Some(v);
        }
        if let Some(v) = self.max_tokens() {
            record.limits.max_tokens = v;
        }
        if let Some(v) = self.max_completion_tokens() {
            record.limits.max_completion_tokens = v;
        }
        if let Some(v) = self.capabilities() {
            record.capabilities = v.to_vec();
        }
        if let Some(v) = self.input_modalities() {
            record.modalities.input = v.to_vec();
        }
        if let Some(v) = self.output_modalities() {
            record.modalities.output = v.to_vec();
        }
        record
    }
}

// ── Provider descriptor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Static,
    Meta,
}

/// Contents of `providers/<name>/provider.yaml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub provider_type: String,
    #[serde(default)]
    pub supports_model_discovery: bool,
}

impl ProviderDescriptor {
    pub fn kind(&self) -> ProviderKind {
        if self.provider_type == "meta" {
            ProviderKind::Meta
        } else {
            ProviderKind::Static
        }
    }
}
