use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::compare::{CompareOptions, FieldChange, field_changes, tag_sets_differ};
use crate::error::{CatalogError, Result};
use crate::model::{DiscoveredModel, ModelRecord, UpdaterStamp};
use crate::splice::splice;
use crate::store::{CatalogStore, write_atomic};
use crate::tree::Node;

/// What happened to one record file.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub is_new: bool,
    /// Empty for new files and for existing files that were already current.
    pub changes: Vec<FieldChange>,
    /// `false` when the existing file already matched and was left alone.
    pub written: bool,
}

/// Writes discovered values into record files without disturbing anything
/// the source does not speak for.
///
/// Existing files are parsed as an ordered [`Node`] tree and the
/// authoritative fields the candidate supplies are overlaid.  Only the
/// entries whose value changed are re-rendered into the original text, so
/// comments, quoting and number formatting elsewhere in the file survive
/// byte for byte.  Files laid out in a way the line splicer declines are
/// re-serialized whole, still with their keys in order.
#[derive(Debug, Clone)]
pub struct SmartMergeWriter {
    store: CatalogStore,
    opts: CompareOptions,
}

impl SmartMergeWriter {
    pub fn new(store: CatalogStore, opts: CompareOptions) -> Self {
        Self { store, opts }
    }

    pub fn write(
        &self,
        provider: &str,
        discovered: &DiscoveredModel,
        stamp: Option<&UpdaterStamp>,
    ) -> Result<WriteOutcome> {
        let path = self.store.record_path(provider, &discovered.name);

        if !path.exists() {
            let mut record = discovered.to_record();
            record.x_updater = stamp.cloned();
            let text = to_yaml(&record, &discovered.name)?;
            write_atomic(&path, text.as_bytes())?;
            debug!(provider, model = %discovered.name, "record created");
            return Ok(WriteOutcome {
                path,
                is_new: true,
                changes: Vec::new(),
                written: true,
            });
        }

        let raw = fs::read_to_string(&path).map_err(|e| CatalogError::io(&path, e))?;
        let existing: ModelRecord =
            serde_yaml::from_str(&raw).map_err(|e| CatalogError::yaml(&path, e))?;
        let changes = field_changes(&existing, discovered, self.opts);
        if changes.is_empty() {
            return Ok(WriteOutcome {
                path,
                is_new: false,
                changes,
                written: false,
            });
        }

        let mut tree = Node::parse(&raw).map_err(|e| CatalogError::yaml(&path, e))?;
        if !matches!(tree, Node::Map(_)) {
            return Err(CatalogError::NotAMapping { path });
        }
        let before = Value::from(tree.clone());
        tree.merge(Node::from(self.overlay(&existing, discovered, stamp)?));
        let after = Value::from(tree.clone());

        let text = match splice(&raw, &before, &after) {
            Some(text) => text,
            None => {
                debug!(path = %path.display(), "layout not spliceable, re-rendering record");
                tree.to_yaml().map_err(|e| CatalogError::Serialize {
                    what: discovered.name.clone(),
                    source: e,
                })?
            }
        };
        write_atomic(&path, text.as_bytes())?;
        debug!(
            provider,
            model = %discovered.name,
            changes = changes.len(),
            "record merged"
        );
        Ok(WriteOutcome {
            path,
            is_new: false,
            changes,
            written: true,
        })
    }

    /// The authoritative fields `discovered` has an opinion on, in record
    /// key order.  Absent attributes produce no key at all, so the merge
    /// leaves the stored value alone.  Tag lists that match `existing` as
    /// sets are left out too, keeping the stored order.
    fn overlay(
        &self,
        existing: &ModelRecord,
        d: &DiscoveredModel,
        stamp: Option<&UpdaterStamp>,
    ) -> Result<Value> {
        let mut map = Mapping::new();
        let mut put = |key: &str, value: Value| {
            map.insert(Value::String(key.to_string()), value);
        };

        put("name", Value::String(d.name.clone()));
        if self.opts.track_display_name {
            if let Some(v) = d.display_name() {
                put("display_name", Value::String(v.to_string()));
            }
        }
        if let Some(v) = d.family() {
            put("family", Value::String(v.to_string()));
        }
        if let Some(v) = d.status() {
            put("status", Value::String(v.to_string()));
        }
        if let Some(cost) = d.cost() {
            put("cost", to_value(&cost, &d.name)?);
        }

        let mut limits = Mapping::new();
        if let Some(v) = d.max_tokens() {
            limits.insert("max_tokens".into(), v.into());
        }
        if let Some(v) = d.max_completion_tokens() {
            limits.insert("max_completion_tokens".into(), v.into());
        }
        if !limits.is_empty() {
            put("limits", Value::Mapping(limits));
        }

        if let Some(v) = d.capabilities().filter(|v| tag_sets_differ(&existing.capabilities, v)) {
            put("capabilities", tags(v));
        }

        let mut modalities = Mapping::new();
        if let Some(v) = d
            .input_modalities()
            .filter(|v| tag_sets_differ(&existing.modalities.input, v))
        {
            modalities.insert("input".into(), tags(v));
        }
        if let Some(v) = d
            .output_modalities()
            .filter(|v| tag_sets_differ(&existing.modalities.output, v))
        {
            modalities.insert("output".into(), tags(v));
        }
        if !modalities.is_empty() {
            put("modalities", Value::Mapping(modalities));
        }

        if let Some(stamp) = stamp {
            put("x_updater", to_value(stamp, &d.name)?);
        }
        Ok(Value::Mapping(map))
    }
}

fn tags(items: &[String]) -> Value {
    Value::Sequence(items.iter().cloned().map(Value::String).collect())
}

fn to_value<T: Serialize>(value: &T, what: &str) -> Result<Value> {
    serde_yaml::to_value(value).map_err(|e| CatalogError::Serialize {
        what: what.to_string(),
        source: e,
    })
}

fn to_yaml<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| CatalogError::Serialize {
        what: what.to_string(),
        source: e,
    })
}
