use std::fs;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{CatalogError, Result};
use crate::model::ProviderKind;
use crate::store::{CatalogStore, MANIFEST_FILE, MODELS_DIR, PROVIDERS_DIR, STANDARD_FILES, write_atomic};
use crate::version::CatalogVersion;

pub const SCHEMA_VERSION: &str = "1.0";

const HEADER: &str = "# Model Catalog Manifest\n\
                      # Auto-generated - DO NOT EDIT MANUALLY\n\
                      # Run: keeper sync or keeper manifest to regenerate\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestProvider {
    pub name: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManifestStats {
    pub total_providers: usize,
    pub total_models: usize,
    pub static_providers: usize,
    pub meta_providers: usize,
}

/// Aggregate index of the catalog written to `manifest.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub generated_at: String,
    pub schema_version: String,
    pub providers: Vec<ManifestProvider>,
    pub stats: ManifestStats,
}

impl Manifest {
    /// Equality ignoring `generated_at`.
    pub fn same_content(&self, other: &Manifest) -> bool {
        self.version == other.version
            && self.schema_version == other.schema_version
            && self.providers == other.providers
            && self.stats == other.stats
    }
}

/// Builds the manifest from what is on disk right now.  Every listing is
/// sorted, so the result depends only on the tree and `generated_at`.
pub fn build_manifest(
    store: &CatalogStore,
    version: CatalogVersion,
    generated_at: DateTime<Utc>,
) -> Result<Manifest> {
    let mut providers = Vec::new();
    let mut stats = ManifestStats::default();

    for name in store.provider_names()? {
        let dir = store.provider_dir(&name);
        let files = STANDARD_FILES
            .iter()
            .filter(|f| dir.join(f).is_file())
            .map(|f| format!("{PROVIDERS_DIR}/{name}/{f}"))
            .collect();

        // A provider without a readable descriptor counts toward neither kind.
        match store.load_descriptor(&name) {
            Ok(Some(descriptor)) => match descriptor.kind() {
                ProviderKind::Meta => stats.meta_providers += 1,
                ProviderKind::Static => stats.static_providers += 1,
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(provider = %name, error = %err, "unreadable provider.yaml"),
        }

        let models = model_files(store, &name)?;
        stats.total_models += models.len();
        providers.push(ManifestProvider {
            name,
            files,
            models,
        });
    }
    stats.total_providers = providers.len();

    Ok(Manifest {
        version: version.to_string(),
        generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        schema_version: SCHEMA_VERSION.to_string(),
        providers,
        stats,
    })
}

fn model_files(store: &CatalogStore, provider: &str) -> Result<Vec<String>> {
    let dir = store.models_dir(provider);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| CatalogError::io(&dir, e.into()))?;
        let file_name = entry.file_name().to_string_lossy();
        if entry.file_type().is_file() && file_name.ends_with(".yaml") {
            files.push(format!("{PROVIDERS_DIR}/{provider}/{MODELS_DIR}/{file_name}"));
        }
    }
    Ok(files)
}

pub fn read_manifest(store: &CatalogStore) -> Result<Option<Manifest>> {
    let path = store.base().join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|e| CatalogError::io(&path, e))?;
    let manifest = serde_yaml::from_str(&raw).map_err(|e| CatalogError::yaml(&path, e))?;
    Ok(Some(manifest))
}

pub fn write_manifest(store: &CatalogStore, manifest: &Manifest) -> Result<()> {
    let body = serde_yaml::to_string(manifest).map_err(|e| CatalogError::Serialize {
        what: MANIFEST_FILE.to_string(),
        source: e,
    })?;
    write_atomic(
        &store.base().join(MANIFEST_FILE),
        format!("{HEADER}{body}").as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::seed_catalog;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn manifest_lists_files_and_counts_kinds() {
        let dir = TempDir::new().unwrap();
        seed_catalog(dir.path());
        let store = CatalogStore::new(dir.path());

        let m = build_manifest(&store, CatalogVersion::new(1, 4, 2), at(0)).unwrap();
        assert_eq!(m.version, "1.4.2");
        assert_eq!(m.generated_at, "1970-01-01T00:00:00Z");
        assert_eq!(m.schema_version, "1.0");

        let names: Vec<_> = m.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["openai", "openrouter"]);
        assert_eq!(
            m.providers[0].files,
            vec![
                "providers/openai/provider.yaml",
                "providers/openai/categories.yaml"
            ]
        );
        assert_eq!(
            m.providers[0].models,
            vec![
                "providers/openai/models/gpt-3.5-turbo.yaml",
                "providers/openai/models/gpt-4o.yaml"
            ]
        );
        assert!(m.providers[1].models.is_empty());
        assert_eq!(
            m.stats,
            ManifestStats {
                total_providers: 2,
                total_models: 2,
                static_providers: 1,
                meta_providers: 1,
            }
        );
    }

    #[test]
    fn rebuild_is_deterministic_apart_from_timestamp() {
        let dir = TempDir::new().unwrap();
        seed_catalog(dir.path());
        let store = CatalogStore::new(dir.path());
        let v = CatalogVersion::new(1, 4, 2);

        let a = build_manifest(&store, v, at(0)).unwrap();
        let b = build_manifest(&store, v, at(3600)).unwrap();
        assert_ne!(a, b);
        assert!(a.same_content(&b));
    }

    #[test]
    fn written_manifest_has_header_and_reads_back() {
        let dir = TempDir::new().unwrap();
        seed_catalog(dir.path());
        let store = CatalogStore::new(dir.path());
        let m = build_manifest(&store, CatalogVersion::new(2, 0, 0), at(0)).unwrap();
        write_manifest(&store, &m).unwrap();

        let text = fs::read_to_string(dir.path().join("manifest.yaml")).unwrap();
        assert!(text.starts_with("# Model Catalog Manifest\n# Auto-generated - DO NOT EDIT MANUALLY\n"));
        assert_eq!(read_manifest(&store).unwrap(), Some(m));
    }

    #[test]
    fn non_yaml_files_are_not_listed() {
        let dir = TempDir::new().unwrap();
        seed_catalog(dir.path());
        fs::write(dir.path().join("providers/openai/models/README.md"), "x").unwrap();
        let store = CatalogStore::new(dir.path());
        let m = build_manifest(&store, CatalogVersion::new(1, 0, 0), at(0)).unwrap();
        assert_eq!(m.stats.total_models, 2);
    }
}
