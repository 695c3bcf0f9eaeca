use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, anyhow, ensure};
use serde::Deserialize;
use serde_yaml::Value;

use crate::{adapters::outbound::configuration::YamlConfiguration, core::ResolverOptions};

/// Engine settings loaded from YAML.
///
/// ```yaml
/// expressions:
///   allow_configuration_access: true
///   strict_members: false
/// configuration:
///   smtp:
///     host: mail.example.com
/// templates:
///   greeting: "Hello {{Input.name}}"
///   invoice: templates/invoice.hbs
/// ```
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub expressions: ExpressionsConfig,
    /// Tree exposed to expressions as `Configuration.<name>`.
    #[serde(default)]
    pub configuration: Option<Value>,
    /// Named templates; values are inline text or a path relative to the config file.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpressionsConfig {
    #[serde(default)]
    pub allow_configuration_access: bool,
    #[serde(default)]
    pub strict_members: bool,
}

impl EngineConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file at {}", path_ref.display()))?;
        let mut config = Self::from_yaml_str(&raw)
            .with_context(|| format!("Invalid configuration in {}", path_ref.display()))?;
        let base_dir = path_ref.parent().unwrap_or_else(|| Path::new("."));
        config
            .hydrate_templates(base_dir)
            .with_context(|| format!("Failed to hydrate templates for {}", path_ref.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Unable to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(tree) = &self.configuration {
            ensure!(
                tree.is_mapping() || tree.is_null(),
                "The configuration tree must be a mapping of named sections"
            );
        }
        for (name, template) in &self.templates {
            ensure!(!name.trim().is_empty(), "Template names must not be empty");
            ensure!(
                !template.trim().is_empty(),
                "Template '{name}' has no content"
            );
        }
        Ok(())
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions::default()
            .with_configuration_access(self.expressions.allow_configuration_access)
    }

    /// Provider over the `configuration:` tree; empty when none was given.
    pub fn configuration_provider(&self) -> Result<YamlConfiguration> {
        match &self.configuration {
            Some(tree) => YamlConfiguration::from_yaml_value(tree.clone()),
            None => Ok(YamlConfiguration::default()),
        }
    }

    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    fn hydrate_templates(&mut self, base_dir: &Path) -> Result<()> {
        for (name, template) in self.templates.iter_mut() {
            *template = resolve_template(template, base_dir)
                .with_context(|| format!("Template '{name}' could not be loaded"))?;
        }
        Ok(())
    }
}

impl FromStr for EngineConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml_str(s)
    }
}

fn resolve_template(raw: &str, base_dir: &Path) -> Result<String> {
    if raw.contains('\n') || raw.contains("{{") {
        return Ok(raw.to_string());
    }

    let trimmed = raw.trim();
    let candidate = Path::new(trimmed);
    let joined: PathBuf = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    };

    if joined.is_file() {
        return fs::read_to_string(&joined)
            .with_context(|| format!("Failed to read template {}", joined.display()));
    }

    if looks_like_template_path(trimmed) {
        return Err(anyhow!(
            "Template '{}' was not found relative to {}",
            trimmed,
            base_dir.display()
        ));
    }

    Ok(raw.to_string())
}

fn looks_like_template_path(value: &str) -> bool {
    value.contains('/')
        || value.contains('\\')
        || value.ends_with(".hbs")
        || value.ends_with(".handlebars")
        || value.ends_with(".tmpl")
}
