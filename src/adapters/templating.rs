use std::sync::{Arc, LazyLock};

use handlebars::Handlebars;
use regex::Regex;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::{
    core::{Result, Value, error::Error as CoreError},
    expressions::{
        ExpressionContext, Resolution, SymbolResolver,
        configuration::ConfigurationSection,
        resolver::{CONFIGURATION, INPUT, METADATA_SYMBOLS, VARIABLES},
    },
};

static MUSTACHE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\{?~?([^}]*)\}\}").expect("valid regex"));
static SYMBOL_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*").expect("valid regex")
});

/// Result of rendering a template against a workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    pub text: String,
    /// Paths that stopped at a member no resolver knows about.
    pub unknown_members: Vec<String>,
    /// Paths whose root symbol is not available, e.g. disabled configuration.
    pub undefined: Vec<String>,
}

/// Handlebars front end for the symbol resolver.
///
/// Symbol paths referenced by the template are resolved first and the
/// results are handed to Handlebars as nested data, so
/// `{{Variables.customer.name}}` renders whatever the registry resolves.
/// Typed objects are opaque: only members reached through a full symbol path
/// render, never fields of their JSON projection.
#[derive(Clone)]
pub struct HandlebarsRenderer {
    engine: Arc<Handlebars<'static>>,
    resolver: SymbolResolver,
    strict_members: bool,
}

impl HandlebarsRenderer {
    pub fn new(resolver: SymbolResolver) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self {
            engine: Arc::new(handlebars),
            resolver,
            strict_members: false,
        }
    }

    /// Fail rendering when a path hits an unknown member instead of rendering it empty.
    pub fn with_strict_members(mut self, strict: bool) -> Self {
        self.strict_members = strict;
        self
    }

    pub async fn render(&self, template: &str, context: ExpressionContext<'_>) -> Result<RenderOutput> {
        let mut paths = symbol_paths(template);
        paths.sort_by_key(|path| path.matches('.').count());

        let mut data = Map::new();
        let mut output = RenderOutput::default();
        for path in paths {
            match self.resolver.resolve(&path, context).await {
                Resolution::Value(value) => insert_path(&mut data, &path, template_data(&value)),
                Resolution::Undefined => output.undefined.push(path),
                Resolution::UnknownMember { type_name, member } => {
                    if self.strict_members {
                        return Err(CoreError::TemplateRendering(format!(
                            "{path}: type {type_name} has no member {member}"
                        )));
                    }
                    debug!(%path, %type_name, %member, "Rendering unknown member as empty");
                    output.unknown_members.push(path);
                }
            }
        }

        for path in &output.unknown_members {
            insert_path(&mut data, path, Json::Null);
        }

        output.text = self
            .engine
            .render_template(template, &Json::Object(data))
            .map_err(|e| CoreError::TemplateRendering(e.to_string()))?;
        Ok(output)
    }
}

/// Data handed to Handlebars for a resolved value. Configuration sections
/// expose their tree since every child is reachable anyway.
fn template_data(value: &Value) -> Json {
    match value {
        Value::Object(object) => match object.downcast_ref::<ConfigurationSection>() {
            Some(section) => section.raw().unwrap_or(Json::Null),
            None => Json::Object(Map::new()),
        },
        value => value.to_json(),
    }
}

/// Distinct symbol paths rooted at a known symbol, in order of appearance.
fn symbol_paths(template: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for mustache in MUSTACHE.captures_iter(template) {
        for candidate in SYMBOL_PATH.find_iter(&mustache[1]) {
            let path = candidate.as_str();
            let root = path.split('.').next().unwrap_or_default();
            let known = (matches!(root, VARIABLES | INPUT | CONFIGURATION) && path.contains('.'))
                || METADATA_SYMBOLS.contains(&root);
            if known && !paths.iter().any(|p| p == path) {
                paths.push(path.to_string());
            }
        }
    }
    paths
}

/// Writes `value` at `path` inside `data`, creating intermediate objects.
/// A shallower path already holding a non-object keeps its value.
fn insert_path(data: &mut Map<String, Json>, path: &str, value: Json) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = data;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        current = match entry {
            Json::Object(map) => map,
            _ => return,
        };
    }
    match value {
        Json::Object(incoming) if matches!(current.get(*last), Some(Json::Object(_))) => {
            if let Some(Json::Object(existing)) = current.get_mut(*last) {
                for (key, value) in incoming {
                    existing.entry(key).or_insert(value);
                }
            }
        }
        value => {
            current.insert(last.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::Serialize;
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::outbound::configuration::YamlConfiguration,
        core::ResolverOptions,
        expressions::MemberAccessRegistry,
        runtime::{
            context::{ScopeOwner, WorkflowExecutionContext, WorkflowIdentity},
            test_support::noop,
        },
    };

    #[derive(Serialize)]
    struct Customer {
        name: String,
        tier: String,
    }

    #[derive(Serialize)]
    struct Secret {
        password: String,
    }

    fn renderer(allow_configuration: bool) -> HandlebarsRenderer {
        let mut builder = MemberAccessRegistry::builder();
        builder.register_member::<Customer, _>("name", |c: &Customer| Value::from(c.name.as_str()));
        if allow_configuration {
            builder.with_configuration_access();
        }
        let provider = Arc::new(YamlConfiguration::from_json(json!({ "site": { "title": "Shop" } })));
        let resolver = SymbolResolver::new(
            Arc::new(builder.build()),
            ResolverOptions::default().with_configuration_access(allow_configuration),
        )
        .with_configuration(provider);
        HandlebarsRenderer::new(resolver)
    }

    fn workflow() -> WorkflowExecutionContext {
        let mut workflow = WorkflowExecutionContext::new(WorkflowIdentity::new("greet", "greet:1", 1))
            .with_correlation_id("c-42")
            .with_input([("greeting", "Hello")]);
        let step = workflow
            .attach_activity(noop("step"), None, HashMap::new())
            .unwrap();
        workflow
            .declare_variable(
                ScopeOwner::Activity(step),
                "customer",
                Some(Value::object(Customer {
                    name: "Ada".into(),
                    tier: "gold".into(),
                })),
            )
            .unwrap();
        workflow.declare_workflow_variable(
            "secret",
            Value::object(Secret {
                password: "hunter2".into(),
            }),
        );
        workflow
    }

    #[tokio::test]
    async fn renders_resolved_symbols() {
        let workflow = workflow();
        let ctx = ExpressionContext::for_activity(&workflow, workflow.root_activities()[0]);

        let output = renderer(true)
            .render(
                "{{Input.greeting}}, {{Variables.customer.name}} <{{CorrelationId}}> @ {{Configuration.site.title}}",
                ctx,
            )
            .await
            .unwrap();
        assert_eq!(output.text, "Hello, Ada <c-42> @ Shop");
        assert!(output.unknown_members.is_empty());
        assert!(output.undefined.is_empty());
    }

    #[tokio::test]
    async fn unknown_members_render_empty_unless_strict() {
        let workflow = workflow();
        let ctx = ExpressionContext::for_activity(&workflow, workflow.root_activities()[0]);

        let lenient = renderer(false)
            .render("[{{Variables.customer.tier}}]", ctx)
            .await
            .unwrap();
        assert_eq!(lenient.text, "[]");
        assert_eq!(lenient.unknown_members, vec!["Variables.customer.tier".to_string()]);

        let strict = renderer(false)
            .with_strict_members(true)
            .render("[{{Variables.customer.tier}}]", ctx)
            .await;
        assert!(matches!(strict, Err(CoreError::TemplateRendering(_))));
    }

    #[tokio::test]
    async fn unregistered_objects_never_leak_their_fields() {
        let workflow = workflow();
        let ctx = ExpressionContext::for_activity(&workflow, workflow.root_activities()[0]);

        let output = renderer(false)
            .render(
                "{{#with Variables.secret}}{{password}}{{/with}}|{{Variables.secret.password}}|\
                 {{#with Variables.customer}}{{tier}}{{/with}}|{{Variables.customer.tier}}",
                ctx,
            )
            .await
            .unwrap();
        assert!(!output.text.contains("hunter2"));
        assert!(!output.text.contains("gold"));
        assert_eq!(output.text, "|||");
        assert_eq!(
            output.unknown_members,
            vec![
                "Variables.secret.password".to_string(),
                "Variables.customer.tier".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn configuration_sections_render_their_tree() {
        let workflow = workflow();
        let ctx = ExpressionContext::for_workflow(&workflow);

        let output = renderer(true)
            .render("{{#with Configuration.site}}{{title}}{{/with}}", ctx)
            .await
            .unwrap();
        assert_eq!(output.text, "Shop");
    }

    #[tokio::test]
    async fn disabled_configuration_is_reported_undefined() {
        let workflow = workflow();
        let ctx = ExpressionContext::for_workflow(&workflow);

        let output = renderer(false)
            .render("{{#if Configuration.site.title}}yes{{else}}no{{/if}}", ctx)
            .await
            .unwrap();
        assert_eq!(output.text, "no");
        assert_eq!(output.undefined, vec!["Configuration.site.title".to_string()]);
    }

    #[test]
    fn nested_paths_merge_into_one_tree() {
        let mut data = Map::new();
        insert_path(&mut data, "Variables.order", json!({ "id": 7 }));
        insert_path(&mut data, "Variables.order.total", json!(12.5));
        insert_path(&mut data, "Variables.count", json!(3));
        insert_path(&mut data, "Variables.count.extra", json!(1));

        assert_eq!(
            Json::Object(data),
            json!({ "Variables": { "order": { "id": 7, "total": 12.5 }, "count": 3 } })
        );
    }
}
