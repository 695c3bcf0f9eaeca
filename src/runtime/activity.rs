use std::{
    collections::HashMap,
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{Result as CoreResult, Value},
    expressions::{ExpressionContext, Resolution},
    runtime::{
        context::{ActivityId, ScopeOwner, WorkflowExecutionContext},
        invoker::{ActivityInvocationOptions, ActivityInvoker},
    },
};

/// What an activity behaviour asks the invoker to do with its context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOutcome {
    Completed,
    /// Park the context until it is resumed; `bookmark` is handed back to `resume`.
    Suspend { bookmark: String },
}

impl ActivityOutcome {
    pub fn suspend(bookmark: impl Into<String>) -> Self {
        ActivityOutcome::Suspend {
            bookmark: bookmark.into(),
        }
    }
}

/// One executable step within a workflow.
#[async_trait]
pub trait Activity: Send + Sync {
    /// Identity of this activity within its workflow definition.
    fn id(&self) -> &str;

    fn activity_type(&self) -> &str;

    async fn execute(&self, scope: &mut ActivityScope<'_>) -> Result<ActivityOutcome>;

    /// Continues a suspended execution. Defaults to running the behaviour again.
    async fn resume(
        &self,
        scope: &mut ActivityScope<'_>,
        _bookmark: &str,
    ) -> Result<ActivityOutcome> {
        self.execute(scope).await
    }
}

/// The view an activity behaviour gets of its own execution context while it runs.
pub struct ActivityScope<'a> {
    workflow: &'a mut WorkflowExecutionContext,
    activity_id: ActivityId,
    invoker: &'a ActivityInvoker,
    cancellation: CancellationToken,
}

impl<'a> ActivityScope<'a> {
    pub(crate) fn new(
        workflow: &'a mut WorkflowExecutionContext,
        activity_id: ActivityId,
        invoker: &'a ActivityInvoker,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            workflow,
            activity_id,
            invoker,
            cancellation,
        }
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    pub fn workflow(&self) -> &WorkflowExecutionContext {
        self.workflow
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Entry of this invocation's own input mapping.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.workflow
            .activity(self.activity_id)
            .ok()
            .and_then(|ctx| ctx.input().get(name))
    }

    /// Nearest settled variable visible from this activity.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.workflow.find_variable(self.scope(), name)
    }

    /// Declares (or rebinds) a variable in this activity's own scope.
    pub fn declare_variable(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let scope = self.scope();
        self.workflow.declare_variable(scope, name, Some(value.into()))?;
        Ok(())
    }

    /// Assigns the nearest visible declaration, declaring locally if there is none.
    pub fn set_variable(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let scope = self.scope();
        self.workflow.set_variable(scope, name, value)
    }

    pub fn expression_context(&self) -> ExpressionContext<'_> {
        ExpressionContext::for_activity(self.workflow, self.activity_id)
    }

    /// Resolves a symbol path such as `Input.name` against this activity.
    pub async fn resolve(&self, path: &str) -> Resolution {
        self.invoker
            .resolver()
            .resolve(path, self.expression_context())
            .await
    }

    /// Runs `activity` as a child of this one, sharing the cancellation signal.
    pub fn invoke_child(
        &mut self,
        activity: Arc<dyn Activity>,
        input: HashMap<String, Value>,
    ) -> BoxFuture<'_, CoreResult<ActivityId>> {
        let options = ActivityInvocationOptions::default()
            .with_parent(self.activity_id)
            .with_input(input)
            .with_cancellation(self.cancellation.child_token());
        let invoker = self.invoker;
        Box::pin(invoker.invoke(&mut *self.workflow, activity, options))
    }

    fn scope(&self) -> ScopeOwner {
        ScopeOwner::Activity(self.activity_id)
    }
}

/// Activities addressable by id, used to rebind behaviours to rehydrated contexts.
#[derive(Default, Clone)]
pub struct ActivityCatalog {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, activity: Arc<dyn Activity>) -> &mut Self {
        self.activities.insert(activity.id().to_string(), activity);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}
