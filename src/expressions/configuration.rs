use std::{fmt, sync::Arc};

use serde::{Serialize, Serializer};
use serde_json::Value as Json;

use crate::{
    core::{Value, ports::ConfigurationProvider},
    expressions::members::MemberAccessRegistryBuilder,
};

/// A configuration section exposed to expressions. Nested sections are
/// reached as members: `Configuration.a.b` reads section `b` of section `a`.
#[derive(Clone)]
pub struct ConfigurationSection {
    provider: Arc<dyn ConfigurationProvider>,
    path: String,
}

impl ConfigurationSection {
    pub fn new(provider: Arc<dyn ConfigurationProvider>, path: impl Into<String>) -> Self {
        Self {
            provider,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw(&self) -> Option<Json> {
        self.provider.get_section(&self.path)
    }

    /// The child section `name`, or `None` if it does not exist.
    pub fn section(&self, name: &str) -> Option<ConfigurationSection> {
        let child = ConfigurationSection::new(self.provider.clone(), format!("{}:{name}", self.path));
        child.raw().map(|_| child)
    }

    /// Scalars surface as plain values, sections with children stay wrapped
    /// so further lookups keep going through the provider, and missing
    /// sections are `Nil`.
    pub(crate) fn into_value(self) -> Value {
        match self.raw() {
            None | Some(Json::Null) => Value::Nil,
            Some(Json::Object(_)) | Some(Json::Array(_)) => Value::object(self),
            Some(scalar) => Value::Json(scalar),
        }
    }
}

impl Serialize for ConfigurationSection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().unwrap_or(Json::Null).serialize(serializer)
    }
}

impl fmt::Debug for ConfigurationSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationSection")
            .field("path", &self.path)
            .finish()
    }
}

impl MemberAccessRegistryBuilder {
    /// Makes nested configuration sections resolvable. Only called when
    /// configuration access is allowed.
    pub fn with_configuration_access(&mut self) -> &mut Self {
        self.register_type::<ConfigurationSection, _>(|section, name| {
            Some(
                section
                    .section(name)
                    .map(ConfigurationSection::into_value)
                    .unwrap_or(Value::Nil),
            )
        })
    }
}
