//! Adapter that reads candidates from a local YAML or JSON file.
//!
//! Accepts either a bare list of models or a `{ models: [...] }` document.
//! Useful for providers without a listing API and for offline runs.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use keeper_catalog::DiscoveredModel;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{DiscoveryAdapter, SOURCE_API};

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    List(Vec<DiscoveredModel>),
    Wrapped { models: Vec<DiscoveredModel> },
}

impl SnapshotFile {
    fn into_models(self) -> Vec<DiscoveredModel> {
        match self {
            Self::List(models) | Self::Wrapped { models } => models,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotAdapter {
    name: String,
    path: PathBuf,
    source: String,
    min_expected: usize,
}

impl SnapshotAdapter {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            source: SOURCE_API.to_string(),
            min_expected: 0,
        }
    }

    /// Tag every entry with `source` instead of `api`.
    pub fn with_source(mut self, source: &str) -> Self {
        if !source.is_empty() {
            self.source = source.to_string();
        }
        self
    }

    pub fn with_min_expected(mut self, min: usize) -> Self {
        self.min_expected = min;
        self
    }

    fn is_json(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "json")
    }
}

#[async_trait]
impl DiscoveryAdapter for SnapshotAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_sources(&self) -> Vec<String> {
        vec![self.source.clone()]
    }

    async fn discover(&self, sources: &[String]) -> Result<Vec<DiscoveredModel>> {
        if !sources.iter().any(|s| s == &self.source) {
            debug!(provider = %self.name, source = %self.source, "snapshot source not requested");
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading snapshot {}", self.path.display()))?;
        let file: SnapshotFile = if self.is_json() {
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing snapshot {}", self.path.display()))?
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing snapshot {}", self.path.display()))?
        };

        let mut models = file.into_models();
        for model in &mut models {
            if model.name.trim().is_empty() {
                bail!("snapshot {} has an entry without a name", self.path.display());
            }
            model.discovered_by = self.source.clone();
        }
        info!(provider = %self.name, count = models.len(), "snapshot discovery complete");
        Ok(models)
    }

    async fn health_check(&self) -> Result<()> {
        if !self.path.is_file() {
            bail!("snapshot {} does not exist", self.path.display());
        }
        Ok(())
    }

    fn min_expected_models(&self) -> usize {
        self.min_expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn api() -> Vec<String> {
        vec!["api".to_string()]
    }

    #[tokio::test]
    async fn reads_yaml_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("openai.yaml");
        fs::write(
            &path,
            "- name: gpt-4o\n  family: gpt-4\n  cost: {input_per_1k: 0.005, output_per_1k: 0.015}\n- name: o3\n",
        )
        .unwrap();

        let adapter = SnapshotAdapter::new("openai", &path);
        let models = adapter.discover(&api()).await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].family(), Some("gpt-4"));
        assert!(models[1].cost.is_none());
        assert!(models.iter().all(|m| m.discovered_by == "api"));
    }

    #[tokio::test]
    async fn reads_wrapped_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mistral.json");
        fs::write(&path, r#"{"models":[{"name":"mistral-large","status":"stable"}]}"#).unwrap();

        let adapter = SnapshotAdapter::new("mistral", &path).with_source("docs");
        assert!(adapter.discover(&api()).await.unwrap().is_empty());
        let models = adapter.discover(&["docs".to_string()]).await.unwrap();
        assert_eq!(models[0].discovered_by, "docs");
    }

    #[tokio::test]
    async fn missing_file_fails_health_and_discovery() {
        let dir = TempDir::new().unwrap();
        let adapter = SnapshotAdapter::new("x", dir.path().join("nope.yaml"));
        assert!(adapter.health_check().await.is_err());
        assert!(adapter.discover(&api()).await.is_err());
    }

    #[tokio::test]
    async fn nameless_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.yaml");
        fs::write(&path, "- name: ''\n").unwrap();
        let err = SnapshotAdapter::new("x", &path).discover(&api()).await.unwrap_err();
        assert!(err.to_string().contains("without a name"));
    }
}
