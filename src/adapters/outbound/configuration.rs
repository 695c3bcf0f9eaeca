use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde_json::Value as Json;

use crate::core::ports::ConfigurationProvider;

/// In-memory configuration tree loaded from YAML or JSON.
///
/// Sections are addressed with `:`-separated paths. Keys match exactly first
/// and fall back to a case-insensitive match; array items are addressed by
/// their index.
#[derive(Debug, Clone, Default)]
pub struct YamlConfiguration {
    root: Json,
}

impl YamlConfiguration {
    pub fn from_json(root: Json) -> Self {
        Self { root }
    }

    pub fn from_yaml_value(value: serde_yaml::Value) -> Result<Self> {
        let root = serde_json::to_value(value).context("Configuration tree is not representable as JSON")?;
        Ok(Self { root })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(raw).context("Failed to parse configuration YAML")?;
        Self::from_yaml_value(value)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }

    pub fn root(&self) -> &Json {
        &self.root
    }
}

impl ConfigurationProvider for YamlConfiguration {
    fn get_section(&self, path: &str) -> Option<Json> {
        let mut current = &self.root;
        for segment in path.split(':').filter(|s| !s.is_empty()) {
            current = match current {
                Json::Object(map) => match map.get(segment) {
                    Some(value) => value,
                    None => map
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(segment))
                        .map(|(_, value)| value)?,
                },
                Json::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}
