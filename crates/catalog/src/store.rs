use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CatalogError, Result};
use crate::model::{ModelRecord, ProviderDescriptor, record_file_name};
use crate::version::CatalogVersion;

pub const VERSION_FILE: &str = "version.txt";
pub const MANIFEST_FILE: &str = "manifest.yaml";
pub const PROVIDERS_DIR: &str = "providers";
pub const MODELS_DIR: &str = "models";
pub const DESCRIPTOR_FILE: &str = "provider.yaml";
/// Descriptor files a provider directory may carry, in manifest order.
pub const STANDARD_FILES: [&str; 3] = ["provider.yaml", "categories.yaml", "templates.yaml"];
/// Held open while a pass runs.  Never part of the catalog content.
pub const LOCK_FILE: &str = ".keeper.lock";
/// Suffix of the sibling file [`write_atomic`] renames into place.
pub const TMP_SUFFIX: &str = ".tmp";

/// Everything stored for one provider group.
#[derive(Debug, Clone, Default)]
pub struct ProviderSnapshot {
    pub descriptor: Option<ProviderDescriptor>,
    /// Keyed by record name, so iteration is name-sorted.
    pub records: BTreeMap<String, ModelRecord>,
    /// File name each record was read from, keyed like `records`.
    pub file_names: BTreeMap<String, String>,
}

/// Held for the duration of a sync pass.  Dropping it releases the lock.
#[derive(Debug)]
pub struct CatalogLock {
    file: File,
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Read/write access to the on-disk catalog rooted at `base`:
///
/// ```text
/// base/
///   version.txt
///   manifest.yaml
///   providers/<provider>/provider.yaml
///   providers/<provider>/models/<record>.yaml
/// ```
#[derive(Debug, Clone)]
pub struct CatalogStore {
    base: PathBuf,
}

impl CatalogStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn providers_dir(&self) -> PathBuf {
        self.base.join(PROVIDERS_DIR)
    }

    pub fn provider_dir(&self, provider: &str) -> PathBuf {
        self.providers_dir().join(provider)
    }

    pub fn models_dir(&self, provider: &str) -> PathBuf {
        self.provider_dir(provider).join(MODELS_DIR)
    }

    pub fn record_path(&self, provider: &str, name: &str) -> PathBuf {
        self.models_dir(provider).join(record_file_name(name))
    }

    // ── Version ──────────────────────────────────────────────────────────

    pub fn read_version(&self) -> Result<CatalogVersion> {
        let path = self.base.join(VERSION_FILE);
        let raw = fs::read_to_string(&path).map_err(|e| CatalogError::io(&path, e))?;
        raw.parse()
    }

    pub fn write_version(&self, version: CatalogVersion) -> Result<()> {
        write_atomic(&self.base.join(VERSION_FILE), format!("{version}\n").as_bytes())
    }

    // ── Providers ────────────────────────────────────────────────────────

    /// Provider directory names, sorted.
    pub fn provider_names(&self) -> Result<Vec<String>> {
        let dir = self.providers_dir();
        let mut names = Vec::new();
        for entry in children(&dir) {
            let entry = entry.map_err(|e| CatalogError::io(&dir, e.into()))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    pub fn load_descriptor(&self, provider: &str) -> Result<Option<ProviderDescriptor>> {
        let path = self.provider_dir(provider).join(DESCRIPTOR_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| CatalogError::io(&path, e))?;
        let descriptor = serde_yaml::from_str(&raw).map_err(|e| CatalogError::yaml(&path, e))?;
        Ok(Some(descriptor))
    }

    /// Loads one provider group.  A provider with no directory yet loads as
    /// empty; any unreadable or malformed record file fails the whole group.
    pub fn load_provider(&self, provider: &str) -> Result<ProviderSnapshot> {
        let mut snapshot = ProviderSnapshot {
            descriptor: self.load_descriptor(provider)?,
            records: BTreeMap::new(),
            file_names: BTreeMap::new(),
        };

        let models_dir = self.models_dir(provider);
        if !models_dir.is_dir() {
            return Ok(snapshot);
        }

        for path in record_files(&models_dir)? {
            let record = read_record(&path)?;
            if snapshot.records.contains_key(&record.name) {
                warn!(provider, model = %record.name, path = %path.display(), "duplicate record name, keeping first file");
                continue;
            }
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            snapshot.file_names.insert(record.name.clone(), file_name);
            snapshot.records.insert(record.name.clone(), record);
        }
        debug!(
            provider,
            records = snapshot.records.len(),
            "provider loaded"
        );
        Ok(snapshot)
    }

    /// Every provider group, keyed by directory name.
    pub fn load_all(&self) -> Result<BTreeMap<String, ProviderSnapshot>> {
        let mut all = BTreeMap::new();
        for name in self.provider_names()? {
            let snapshot = self.load_provider(&name)?;
            all.insert(name, snapshot);
        }
        Ok(all)
    }

    // ── Locking ──────────────────────────────────────────────────────────

    /// Takes the catalog-wide exclusive lock, failing fast if another
    /// process holds it.
    pub fn lock(&self) -> Result<CatalogLock> {
        fs::create_dir_all(&self.base).map_err(|e| CatalogError::io(&self.base, e))?;
        let path = self.base.join(LOCK_FILE);
        let file = File::create(&path).map_err(|e| CatalogError::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| CatalogError::Locked(self.base.clone()))?;
        Ok(CatalogLock { file })
    }
}

/// Direct children of `dir`, sorted by file name.
fn children(dir: &Path) -> walkdir::IntoIter {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
}

/// `*.yaml` files directly inside `dir`, sorted by file name.
pub(crate) fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in children(dir) {
        let entry = entry.map_err(|e| CatalogError::io(dir, e.into()))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

pub fn read_record(path: &Path) -> Result<ModelRecord> {
    let raw = fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
    serde_yaml::from_str(&raw).map_err(|e| CatalogError::yaml(path, e))
}

/// Writes `bytes` to `path` via a sibling `.tmp` file and a rename, so a
/// reader never observes a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CatalogError::io(parent, e))?;
    }
    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "catalog".to_string());
        path.with_file_name(format!("{filename}{TMP_SUFFIX}"))
    };

    let write_result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(CatalogError::io(&tmp_path, err));
    }

    fs::rename(&tmp_path, path).map_err(|e| CatalogError::io(path, e))
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::fs;
    use std::path::Path;

    /// Lays out a minimal catalog with one static and one meta provider.
    pub fn seed_catalog(base: &Path) {
        fs::create_dir_all(base.join("providers/openai/models")).unwrap();
        fs::create_dir_all(base.join("providers/openrouter")).unwrap();
        fs::write(base.join("version.txt"), "1.4.2\n").unwrap();
        fs::write(
            base.join("providers/openai/provider.yaml"),
            "name: openai\ndisplay_name: OpenAI\nsupports_model_discovery: true\n",
        )
        .unwrap();
        fs::write(
            base.join("providers/openai/categories.yaml"),
            "categories: []\n",
        )
        .unwrap();
        fs::write(
            base.join("providers/openrouter/provider.yaml"),
            "name: openrouter\nprovider_type: meta\n",
        )
        .unwrap();
        fs::write(
            base.join("providers/openai/models/gpt-4o.yaml"),
            "name: gpt-4o\ndisplay_name: GPT-4o\nfamily: gpt-4\nstatus: stable\n\
             cost:\n  input_per_1k: 0.005\n  output_per_1k: 0.015\n\
             limits:\n  max_tokens: 128000\n\
             capabilities: [chat, vision]\n\
             modalities:\n  input: [text, image]\n  output: [text]\n\
             notes: curated by hand\n",
        )
        .unwrap();
        fs::write(
            base.join("providers/openai/models/gpt-3.5-turbo.yaml"),
            "name: gpt-3.5-turbo\ndisplay_name: GPT-3.5 Turbo\nfamily: gpt-3.5\nstatus: stable\n\
             limits:\n  max_tokens: 16385\n\
             capabilities: [chat]\n\
             modalities:\n  input: [text]\n  output: [text]\n",
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;
    use tempfile::TempDir;

    #[test]
    fn load_provider_reads_records_and_descriptor() {
        let dir = TempDir::new().unwrap();
        testing::seed_catalog(dir.path());
        let store = CatalogStore::new(dir.path());

        let openai = store.load_provider("openai").unwrap();
        assert_eq!(openai.descriptor.unwrap().display_name, "OpenAI");
        let names: Vec<_> = openai.records.keys().cloned().collect();
        assert_eq!(names, vec!["gpt-3.5-turbo", "gpt-4o"]);
        let gpt4o = &openai.records["gpt-4o"];
        assert_eq!(gpt4o.status, Some(Status::Stable));
        assert!(gpt4o.extra.contains_key("notes"));
        assert_eq!(openai.file_names["gpt-4o"], "gpt-4o.yaml");
    }

    #[test]
    fn missing_provider_loads_empty() {
        let dir = TempDir::new().unwrap();
        testing::seed_catalog(dir.path());
        let store = CatalogStore::new(dir.path());
        let snapshot = store.load_provider("mistral").unwrap();
        assert!(snapshot.descriptor.is_none());
        assert!(snapshot.records.is_empty());
    }

    #[test]
    fn malformed_record_fails_the_group() {
        let dir = TempDir::new().unwrap();
        testing::seed_catalog(dir.path());
        fs::write(
            dir.path().join("providers/openai/models/broken.yaml"),
            "name: [unterminated\n",
        )
        .unwrap();
        let store = CatalogStore::new(dir.path());
        let err = store.load_provider("openai").unwrap_err();
        assert!(matches!(err, CatalogError::Yaml { .. }), "{err}");
        // Sibling groups still load.
        assert!(store.load_provider("openrouter").is_ok());
    }

    #[test]
    fn provider_names_are_sorted_dirs() {
        let dir = TempDir::new().unwrap();
        testing::seed_catalog(dir.path());
        fs::write(dir.path().join("providers/README.md"), "not a provider").unwrap();
        fs::create_dir_all(dir.path().join("providers/anthropic/models")).unwrap();
        let store = CatalogStore::new(dir.path());
        assert_eq!(
            store.provider_names().unwrap(),
            vec!["anthropic", "openai", "openrouter"]
        );
    }

    #[test]
    fn record_files_skip_non_yaml_and_nested_dirs() {
        let dir = TempDir::new().unwrap();
        testing::seed_catalog(dir.path());
        let models = dir.path().join("providers/openai/models");
        fs::write(models.join("gpt-4o.yaml.tmp"), "name: partial\n").unwrap();
        fs::create_dir_all(models.join("archive")).unwrap();
        fs::write(models.join("archive/old.yaml"), "name: old\n").unwrap();

        let names: Vec<_> = record_files(&models)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["gpt-3.5-turbo.yaml", "gpt-4o.yaml"]);
    }

    #[test]
    fn version_roundtrip_and_malformed() {
        let dir = TempDir::new().unwrap();
        testing::seed_catalog(dir.path());
        let store = CatalogStore::new(dir.path());
        assert_eq!(store.read_version().unwrap(), CatalogVersion::new(1, 4, 2));

        store.write_version(CatalogVersion::new(1, 5, 0)).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("version.txt")).unwrap(),
            "1.5.0\n"
        );

        fs::write(dir.path().join("version.txt"), "1.5\n").unwrap();
        assert!(matches!(
            store.read_version(),
            Err(CatalogError::MalformedVersion(_))
        ));
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.yaml");
        write_atomic(&path, b"a: 1\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a: 1\n");
        assert!(!dir.path().join("nested/out.yaml.tmp").exists());
    }

    #[test]
    fn second_lock_fails_until_first_is_dropped() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::new(dir.path());
        let first = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(CatalogError::Locked(_))));
        drop(first);
        assert!(store.lock().is_ok());
    }
}
