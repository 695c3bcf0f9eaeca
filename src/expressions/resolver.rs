//! Resolves symbols such as `Variables.total`, `Input.name` or
//! `Configuration.smtp.host` against a running workflow.
//!
//! Precedence is fixed: the root segment selects the source (`Variables`,
//! `Input`, `Configuration` or one of the workflow metadata symbols) and every
//! further segment is a member access through the [`MemberAccessRegistry`].
//! Resolution only ever reads the context tree.

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::{
    core::{ResolverOptions, Value, ports::ConfigurationProvider},
    expressions::{
        configuration::ConfigurationSection,
        members::{MemberAccessRegistry, MemberLookup},
    },
    runtime::context::{ActivityExecutionContext, ActivityId, ScopeOwner, WorkflowExecutionContext},
};

pub const VARIABLES: &str = "Variables";
pub const INPUT: &str = "Input";
pub const CONFIGURATION: &str = "Configuration";
pub const CORRELATION_ID: &str = "CorrelationId";
pub const WORKFLOW_DEFINITION_ID: &str = "WorkflowDefinitionId";
pub const WORKFLOW_DEFINITION_VERSION_ID: &str = "WorkflowDefinitionVersionId";
pub const WORKFLOW_DEFINITION_VERSION: &str = "WorkflowDefinitionVersion";
pub const WORKFLOW_INSTANCE_ID: &str = "WorkflowInstanceId";

/// Root symbols that address workflow metadata directly.
pub const METADATA_SYMBOLS: [&str; 5] = [
    CORRELATION_ID,
    WORKFLOW_DEFINITION_ID,
    WORKFLOW_DEFINITION_VERSION_ID,
    WORKFLOW_DEFINITION_VERSION,
    WORKFLOW_INSTANCE_ID,
];

/// The point in the context tree an expression is evaluated from.
#[derive(Clone, Copy)]
pub struct ExpressionContext<'a> {
    workflow: &'a WorkflowExecutionContext,
    activity: Option<ActivityId>,
}

impl<'a> ExpressionContext<'a> {
    /// Workflow-level evaluation with no current activity.
    pub fn for_workflow(workflow: &'a WorkflowExecutionContext) -> Self {
        Self {
            workflow,
            activity: None,
        }
    }

    pub fn for_activity(workflow: &'a WorkflowExecutionContext, activity: ActivityId) -> Self {
        Self {
            workflow,
            activity: Some(activity),
        }
    }

    pub fn workflow(&self) -> &'a WorkflowExecutionContext {
        self.workflow
    }

    pub fn activity(&self) -> Option<&'a ActivityExecutionContext> {
        self.activity
            .and_then(|id| self.workflow.activity(id).ok())
    }

    fn scope(&self) -> ScopeOwner {
        match self.activity {
            Some(id) => ScopeOwner::Activity(id),
            None => ScopeOwner::Workflow,
        }
    }
}

/// Outcome of resolving a symbol path.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The symbol resolved; absent variables and inputs resolve to `Nil`.
    Value(Value),
    /// The symbol is not available at all, e.g. `Configuration` while
    /// configuration access is disabled. Engines treat it as undefined.
    Undefined,
    /// A member access hit a type with no matching resolver.
    UnknownMember { type_name: String, member: String },
}

impl Resolution {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Resolution::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Collapses undefined and unknown outcomes into the neutral value.
    pub fn into_value(self) -> Value {
        match self {
            Resolution::Value(value) => value,
            _ => Value::Nil,
        }
    }
}

#[derive(Clone)]
pub struct SymbolResolver {
    registry: Arc<MemberAccessRegistry>,
    configuration: Option<Arc<dyn ConfigurationProvider>>,
    options: ResolverOptions,
}

impl SymbolResolver {
    pub fn new(registry: Arc<MemberAccessRegistry>, options: ResolverOptions) -> Self {
        Self {
            registry,
            configuration: None,
            options,
        }
    }

    pub fn with_configuration(mut self, provider: Arc<dyn ConfigurationProvider>) -> Self {
        self.configuration = Some(provider);
        self
    }

    pub fn registry(&self) -> &Arc<MemberAccessRegistry> {
        &self.registry
    }

    pub fn options(&self) -> ResolverOptions {
        self.options
    }

    /// Resolves a dotted symbol path.
    pub async fn resolve(&self, path: &str, context: ExpressionContext<'_>) -> Resolution {
        let mut segments = path.split('.').map(str::trim);
        let Some(root) = segments.next().filter(|root| !root.is_empty()) else {
            return Resolution::Undefined;
        };

        let resolved = match root {
            VARIABLES | INPUT | CONFIGURATION => match segments.next() {
                Some(name) if !name.is_empty() => self.resolve_named(root, name, context),
                _ => None,
            },
            _ => self.metadata(root, context),
        };
        let Some(mut current) = resolved else {
            debug!(path, "Symbol is undefined");
            return Resolution::Undefined;
        };

        for member in segments {
            current = match self.resolve_member(&current, member).await {
                MemberLookup::Found(value) => value,
                MemberLookup::Unknown => {
                    warn!(path, member, "Unknown member");
                    return Resolution::UnknownMember {
                        type_name: type_label(&current),
                        member: member.to_string(),
                    };
                }
            };
        }
        Resolution::Value(current)
    }

    /// Nearest settled variable visible from the context, `Nil` when absent.
    pub fn variable(&self, name: &str, context: ExpressionContext<'_>) -> Value {
        context
            .workflow
            .find_variable(context.scope(), name)
            .cloned()
            .unwrap_or_default()
    }

    /// Input lookup: the current activity's own input first, then the
    /// workflow input, then `Nil`. A key present in the activity input wins
    /// even when its value is `Nil`.
    pub fn input(&self, name: &str, context: ExpressionContext<'_>) -> Value {
        if let Some(value) = context
            .activity()
            .and_then(|activity| activity.input().get(name))
        {
            return value.clone();
        }
        context
            .workflow
            .input()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// `Configuration.<name>`; `None` while configuration access is disabled.
    pub fn configuration(&self, name: &str) -> Option<Value> {
        if !self.options.allow_configuration_access {
            return None;
        }
        let value = match &self.configuration {
            Some(provider) => ConfigurationSection::new(provider.clone(), name).into_value(),
            None => Value::Nil,
        };
        Some(value)
    }

    /// Read-only workflow metadata symbols.
    pub fn metadata(&self, symbol: &str, context: ExpressionContext<'_>) -> Option<Value> {
        let workflow = context.workflow;
        let value = match symbol {
            CORRELATION_ID => Value::from(workflow.correlation_id()),
            WORKFLOW_DEFINITION_ID => Value::from(workflow.identity().definition_id.as_str()),
            WORKFLOW_DEFINITION_VERSION_ID => Value::from(workflow.identity().version_id.as_str()),
            WORKFLOW_DEFINITION_VERSION => Value::from(workflow.identity().version),
            WORKFLOW_INSTANCE_ID => Value::from(workflow.instance_id()),
            _ => return None,
        };
        Some(value)
    }

    pub async fn resolve_member(&self, instance: &Value, member: &str) -> MemberLookup {
        self.registry.resolve(instance, member).await
    }

    fn resolve_named(&self, root: &str, name: &str, context: ExpressionContext<'_>) -> Option<Value> {
        match root {
            VARIABLES => Some(self.variable(name, context)),
            INPUT => Some(self.input(name, context)),
            CONFIGURATION => self.configuration(name),
            _ => None,
        }
    }
}

fn type_label(value: &Value) -> String {
    match value {
        Value::Nil => "nil".into(),
        Value::Json(Json::Bool(_)) => "bool".into(),
        Value::Json(Json::Number(_)) => "number".into(),
        Value::Json(Json::String(_)) => "string".into(),
        Value::Json(Json::Array(_)) => "array".into(),
        Value::Json(Json::Object(_)) => "object".into(),
        Value::Json(Json::Null) => "nil".into(),
        Value::Object(object) => object.type_name().into(),
    }
}
