//! Drives a single activity execution through its state machine:
//! not started, running, then completed, suspended or faulted.

use std::{collections::HashMap, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    core::{
        Error, Result, Value,
        ports::{Clock, TelemetrySink},
    },
    expressions::SymbolResolver,
    runtime::{
        activity::{Activity, ActivityOutcome, ActivityScope},
        context::{ActivityId, ActivityStatus, Fault, ScopeOwner, WorkflowExecutionContext},
    },
};

/// Options for an invocation. `parent`, `input` and `variables` only apply to
/// a fresh context and must be left empty alongside `existing`.
#[derive(Debug, Clone, Default)]
pub struct ActivityInvocationOptions {
    /// Parent activity context; `None` attaches the new context as a root.
    pub parent: Option<ActivityId>,
    pub input: HashMap<String, Value>,
    /// Variables declared in the new context before the behaviour runs.
    pub variables: Vec<(String, Value)>,
    /// Reuse this context instead of creating a new one.
    pub existing: Option<ActivityId>,
    pub cancellation: CancellationToken,
}

impl ActivityInvocationOptions {
    pub fn with_parent(mut self, parent: ActivityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_input<K, V>(mut self, input: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.input = input
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    pub fn with_existing(mut self, existing: ActivityId) -> Self {
        self.existing = Some(existing);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

enum Entry {
    Execute,
    Resume(String),
}

/// Creates, drives and hands back activity execution contexts.
pub struct ActivityInvoker {
    resolver: SymbolResolver,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ActivityInvoker {
    pub fn new(
        resolver: SymbolResolver,
        clock: Arc<dyn Clock>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            resolver,
            clock,
            telemetry,
        }
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    /// Invokes `activity` in a new context, or in `options.existing` when supplied.
    /// An existing context must have been created for the same activity.
    ///
    /// Returns the context id once the behaviour completed or suspended. A fault
    /// or cancellation leaves the context `Faulted` and is returned as an error.
    pub async fn invoke(
        &self,
        workflow: &mut WorkflowExecutionContext,
        activity: Arc<dyn Activity>,
        options: ActivityInvocationOptions,
    ) -> Result<ActivityId> {
        let ActivityInvocationOptions {
            parent,
            input,
            variables,
            existing,
            cancellation,
        } = options;

        if let Some(existing) = existing {
            let ctx = workflow.activity(existing)?;
            if ctx.activity().id() != activity.id() {
                return Err(Error::InvalidState(format!(
                    "Activity {existing} belongs to '{}', not '{}'",
                    ctx.activity().id(),
                    activity.id()
                )));
            }
            let reparented = parent.is_some_and(|parent| Some(parent) != ctx.parent());
            if reparented || !input.is_empty() || !variables.is_empty() {
                return Err(Error::InvalidState(format!(
                    "Activity {existing} already exists; its parent, input and variables are fixed"
                )));
            }
            let entry = match ctx.status() {
                ActivityStatus::NotStarted => Entry::Execute,
                ActivityStatus::Suspended { bookmark } => Entry::Resume(bookmark.clone()),
                other => {
                    return Err(Error::InvalidState(format!(
                        "Activity {existing} is {} and cannot be invoked again",
                        other.as_str()
                    )));
                }
            };
            return self.run(workflow, existing, entry, cancellation).await;
        }

        let id = workflow.attach_activity(activity, parent, input)?;
        for (name, value) in variables {
            workflow.declare_variable(ScopeOwner::Activity(id), name, Some(value))?;
        }
        debug!(activity_id = %id, ?parent, "Attached activity execution context");
        self.run(workflow, id, Entry::Execute, cancellation).await
    }

    /// Resumes a suspended context in place, keeping its input and variables.
    pub async fn resume(
        &self,
        workflow: &mut WorkflowExecutionContext,
        id: ActivityId,
        cancellation: CancellationToken,
    ) -> Result<ActivityId> {
        let bookmark = match workflow.activity(id)?.status() {
            ActivityStatus::Suspended { bookmark } => bookmark.clone(),
            other => {
                return Err(Error::InvalidState(format!(
                    "Activity {id} is {} and cannot be resumed",
                    other.as_str()
                )));
            }
        };
        self.run(workflow, id, Entry::Resume(bookmark), cancellation)
            .await
    }

    async fn run(
        &self,
        workflow: &mut WorkflowExecutionContext,
        id: ActivityId,
        entry: Entry,
        cancellation: CancellationToken,
    ) -> Result<ActivityId> {
        let activity = workflow.activity(id)?.activity().clone();
        if cancellation.is_cancelled() {
            return self.cancel(workflow, id, activity.as_ref());
        }

        let now = self.clock.now_ms();
        let ctx = workflow.activity_mut(id)?;
        ctx.status = ActivityStatus::Running;
        ctx.started_at_ms.get_or_insert(now);
        let event = match entry {
            Entry::Execute => "activity_started",
            Entry::Resume(_) => "activity_resumed",
        };
        self.emit(workflow, id, activity.as_ref(), event);

        let outcome = {
            let mut scope = ActivityScope::new(workflow, id, self, cancellation.clone());
            let work = async {
                match &entry {
                    Entry::Execute => activity.execute(&mut scope).await,
                    Entry::Resume(bookmark) => activity.resume(&mut scope, bookmark).await,
                }
            };
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => None,
                result = work => Some(result),
            }
        };
        self.cancel_abandoned(workflow, id)?;

        match outcome {
            None => self.cancel(workflow, id, activity.as_ref()),
            Some(Ok(ActivityOutcome::Completed)) => {
                let now = self.clock.now_ms();
                let ctx = workflow.activity_mut(id)?;
                ctx.status = ActivityStatus::Completed;
                ctx.finished_at_ms = Some(now);
                info!(activity_id = %id, activity = activity.id(), "Activity completed");
                self.emit(workflow, id, activity.as_ref(), "activity_completed");
                Ok(id)
            }
            Some(Ok(ActivityOutcome::Suspend { bookmark })) => {
                info!(activity_id = %id, activity = activity.id(), %bookmark, "Activity suspended");
                workflow.activity_mut(id)?.status = ActivityStatus::Suspended { bookmark };
                self.emit(workflow, id, activity.as_ref(), "activity_suspended");
                Ok(id)
            }
            Some(Err(_)) if cancellation.is_cancelled() => {
                self.cancel(workflow, id, activity.as_ref())
            }
            Some(Err(err)) => {
                let cause = format!("{err:#}");
                warn!(activity_id = %id, activity = activity.id(), %cause, "Activity faulted");
                let now = self.clock.now_ms();
                let ctx = workflow.activity_mut(id)?;
                ctx.status = ActivityStatus::Faulted {
                    fault: Fault {
                        message: cause.clone(),
                        cancelled: false,
                    },
                };
                ctx.finished_at_ms = Some(now);
                self.emit(workflow, id, activity.as_ref(), "activity_faulted");
                Err(Error::ActivityFaulted {
                    context: id,
                    activity_id: activity.id().to_string(),
                    activity_type: activity.activity_type().to_string(),
                    cause,
                })
            }
        }
    }

    fn cancel(
        &self,
        workflow: &mut WorkflowExecutionContext,
        id: ActivityId,
        activity: &dyn Activity,
    ) -> Result<ActivityId> {
        self.mark_cancelled(workflow, id, activity)?;
        Err(Error::Cancelled {
            context: id,
            activity_id: activity.id().to_string(),
            activity_type: activity.activity_type().to_string(),
        })
    }

    fn mark_cancelled(
        &self,
        workflow: &mut WorkflowExecutionContext,
        id: ActivityId,
        activity: &dyn Activity,
    ) -> Result<()> {
        info!(activity_id = %id, activity = activity.id(), "Activity cancelled");
        let now = self.clock.now_ms();
        let ctx = workflow.activity_mut(id)?;
        ctx.status = ActivityStatus::Faulted {
            fault: Fault {
                message: "cancelled".into(),
                cancelled: true,
            },
        };
        ctx.finished_at_ms = Some(now);
        self.emit(workflow, id, activity, "activity_cancelled");
        Ok(())
    }

    /// Descendants still `Running` once `id`'s behaviour has returned or been
    /// dropped can never finish; they end cancelled, deepest first.
    fn cancel_abandoned(
        &self,
        workflow: &mut WorkflowExecutionContext,
        id: ActivityId,
    ) -> Result<()> {
        let mut abandoned = Vec::new();
        for descendant in workflow.subtree(id)? {
            let ctx = workflow.activity(descendant)?;
            if descendant != id && matches!(ctx.status(), ActivityStatus::Running) {
                abandoned.push((descendant, ctx.activity().clone()));
            }
        }
        for (descendant, activity) in abandoned.into_iter().rev() {
            self.mark_cancelled(workflow, descendant, activity.as_ref())?;
        }
        Ok(())
    }

    fn emit(
        &self,
        workflow: &WorkflowExecutionContext,
        id: ActivityId,
        activity: &dyn Activity,
        event_name: &str,
    ) {
        let mut props = HashMap::new();
        props.insert("workflow_instance_id".into(), workflow.instance_id().to_string());
        props.insert("activity_context".into(), id.to_string());
        props.insert("activity_id".into(), activity.id().to_string());
        props.insert("activity_type".into(), activity.activity_type().to_string());
        if let Some(correlation_id) = workflow.correlation_id() {
            props.insert("correlation_id".into(), correlation_id.to_string());
        }
        self.telemetry.record_event(event_name, props);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        expressions::{ExpressionContext, Resolution},
        runtime::{
            context::WorkflowIdentity,
            test_support::{RecordingTelemetry, approval, invoker, noop},
        },
    };

    struct Failing;

    #[async_trait]
    impl Activity for Failing {
        fn id(&self) -> &str {
            "charge"
        }

        fn activity_type(&self) -> &str {
            "Charge"
        }

        async fn execute(&self, _scope: &mut ActivityScope<'_>) -> anyhow::Result<ActivityOutcome> {
            anyhow::bail!("card declined")
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Activity for Sleeper {
        fn id(&self) -> &str {
            "delay"
        }

        fn activity_type(&self) -> &str {
            "Delay"
        }

        async fn execute(&self, _scope: &mut ActivityScope<'_>) -> anyhow::Result<ActivityOutcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ActivityOutcome::Completed)
        }
    }

    /// Runs a child with its own input and records what the child saw.
    struct Sequence;

    #[async_trait]
    impl Activity for Sequence {
        fn id(&self) -> &str {
            "sequence"
        }

        fn activity_type(&self) -> &str {
            "Sequence"
        }

        async fn execute(&self, scope: &mut ActivityScope<'_>) -> anyhow::Result<ActivityOutcome> {
            scope.declare_variable("from_parent", "visible")?;
            let child = scope
                .invoke_child(noop("child"), HashMap::from([("x".to_string(), Value::from(1))]))
                .await?;
            let seen = scope.resolve("Input.x").await;
            scope.declare_variable("parent_input_x", seen.into_value())?;
            let child_status = scope.workflow().activity(child)?.status().as_str().to_string();
            scope.declare_variable("child_status", child_status)?;
            Ok(ActivityOutcome::Completed)
        }
    }

    /// Waits on a long-running child until cancelled.
    struct Supervisor;

    #[async_trait]
    impl Activity for Supervisor {
        fn id(&self) -> &str {
            "supervisor"
        }

        fn activity_type(&self) -> &str {
            "Supervisor"
        }

        async fn execute(&self, scope: &mut ActivityScope<'_>) -> anyhow::Result<ActivityOutcome> {
            scope.invoke_child(Arc::new(Sleeper), HashMap::new()).await?;
            Ok(ActivityOutcome::Completed)
        }
    }

    fn workflow() -> WorkflowExecutionContext {
        WorkflowExecutionContext::new(WorkflowIdentity::new("orders", "orders:1", 1))
            .with_instance_id("wf-7")
            .with_input([("x", 2)])
    }

    #[tokio::test]
    async fn completes_and_records_lifecycle() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let invoker = invoker(telemetry.clone());
        let mut workflow = workflow();

        let id = invoker
            .invoke(
                &mut workflow,
                noop("step"),
                ActivityInvocationOptions::default().with_variable("seed", 5),
            )
            .await
            .unwrap();

        let ctx = workflow.activity(id).unwrap();
        assert_eq!(ctx.status(), &ActivityStatus::Completed);
        assert_eq!(ctx.started_at_ms(), Some(1_000));
        assert_eq!(ctx.finished_at_ms(), Some(1_000));
        assert_eq!(
            workflow.find_variable(ScopeOwner::Activity(id), "seed"),
            Some(&Value::from(5))
        );
        assert_eq!(telemetry.names(), vec!["activity_started", "activity_completed"]);
        let (_, props) = telemetry.last().unwrap();
        assert_eq!(props["workflow_instance_id"], "wf-7");
        assert_eq!(props["activity_id"], "step");
    }

    #[tokio::test]
    async fn suspend_and_resume_keep_the_same_context() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let invoker = invoker(telemetry.clone());
        let mut workflow = workflow();

        let id = invoker
            .invoke(
                &mut workflow,
                approval("approve"),
                ActivityInvocationOptions::default().with_input([("amount", 10)]),
            )
            .await
            .unwrap();
        assert_eq!(
            workflow.activity(id).unwrap().status(),
            &ActivityStatus::Suspended {
                bookmark: "approval".into()
            }
        );

        let resumed = invoker
            .resume(&mut workflow, id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resumed, id);
        let ctx = workflow.activity(id).unwrap();
        assert_eq!(ctx.status(), &ActivityStatus::Completed);
        assert_eq!(ctx.input().get("amount"), Some(&Value::from(10)));
        assert_eq!(
            workflow.find_variable(ScopeOwner::Activity(id), "step"),
            Some(&Value::from(2))
        );
        assert_eq!(workflow.activities().count(), 1);
        assert_eq!(
            telemetry.names(),
            vec![
                "activity_started",
                "activity_suspended",
                "activity_resumed",
                "activity_completed"
            ]
        );
    }

    #[tokio::test]
    async fn existing_context_is_reused() {
        let invoker = invoker(Arc::new(RecordingTelemetry::default()));
        let mut workflow = workflow();
        let id = workflow
            .attach_activity(approval("approve"), None, HashMap::new())
            .unwrap();

        let options = ActivityInvocationOptions::default().with_existing(id);
        let first = invoker
            .invoke(&mut workflow, approval("approve"), options.clone())
            .await;
        assert_eq!(first, Ok(id));
        let second = invoker
            .invoke(&mut workflow, approval("approve"), options.clone())
            .await;
        assert_eq!(second, Ok(id));
        assert_eq!(workflow.activity(id).unwrap().status(), &ActivityStatus::Completed);

        let err = invoker
            .invoke(&mut workflow, approval("approve"), options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(workflow.activities().count(), 1);
    }

    #[tokio::test]
    async fn existing_contexts_keep_their_behaviour_and_arguments() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let invoker = invoker(telemetry.clone());
        let mut workflow = workflow();
        let id = workflow
            .attach_activity(approval("approve"), None, HashMap::new())
            .unwrap();
        let options = ActivityInvocationOptions::default().with_existing(id);

        let other = invoker
            .invoke(&mut workflow, noop("step"), options.clone())
            .await
            .unwrap_err();
        assert!(matches!(other, Error::InvalidState(_)));

        let with_input = invoker
            .invoke(
                &mut workflow,
                approval("approve"),
                options.clone().with_input([("amount", 10)]),
            )
            .await
            .unwrap_err();
        assert!(matches!(with_input, Error::InvalidState(_)));

        let with_variable = invoker
            .invoke(
                &mut workflow,
                approval("approve"),
                options.clone().with_variable("seed", 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(with_variable, Error::InvalidState(_)));

        let root = workflow.attach_activity(noop("root"), None, HashMap::new()).unwrap();
        let reparented = invoker
            .invoke(&mut workflow, approval("approve"), options.with_parent(root))
            .await
            .unwrap_err();
        assert!(matches!(reparented, Error::InvalidState(_)));

        let ctx = workflow.activity(id).unwrap();
        assert_eq!(ctx.status(), &ActivityStatus::NotStarted);
        assert!(ctx.input().is_empty());
        assert_eq!(ctx.parent(), None);
        assert!(workflow.find_variable(ScopeOwner::Activity(id), "seed").is_none());
        assert!(telemetry.names().is_empty());
    }

    #[tokio::test]
    async fn resume_requires_a_suspended_context() {
        let invoker = invoker(Arc::new(RecordingTelemetry::default()));
        let mut workflow = workflow();
        let id = invoker
            .invoke(&mut workflow, noop("step"), ActivityInvocationOptions::default())
            .await
            .unwrap();

        let err = invoker
            .resume(&mut workflow, id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn faults_are_recorded_and_propagated() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let invoker = invoker(telemetry.clone());
        let mut workflow = workflow();

        let err = invoker
            .invoke(
                &mut workflow,
                Arc::new(Failing),
                ActivityInvocationOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(!err.is_cancellation());
        assert_eq!(err.activity_id(), Some("charge"));

        let id = err.context().unwrap();
        assert_eq!(workflow.root_activities(), &[id]);
        let ctx = workflow.activity(id).unwrap();
        let fault = ctx.status().fault().unwrap();
        assert_eq!(fault.message, "card declined");
        assert!(!fault.cancelled);
        assert_eq!(telemetry.names().last().map(String::as_str), Some("activity_faulted"));
    }

    #[tokio::test]
    async fn cancellation_before_start_never_runs_the_behaviour() {
        let invoker = invoker(Arc::new(RecordingTelemetry::default()));
        let mut workflow = workflow();
        let token = CancellationToken::new();
        token.cancel();

        let err = invoker
            .invoke(
                &mut workflow,
                approval("approve"),
                ActivityInvocationOptions::default().with_cancellation(token),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        let id = err.context().unwrap();
        let ctx = workflow.activity(id).unwrap();
        assert!(ctx.status().fault().unwrap().cancelled);
        assert_eq!(ctx.started_at_ms(), None);
        assert!(workflow.find_variable(ScopeOwner::Activity(id), "step").is_none());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_behaviour() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let invoker = invoker(telemetry.clone());
        let mut workflow = workflow();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = invoker
            .invoke(
                &mut workflow,
                Arc::new(Sleeper),
                ActivityInvocationOptions::default().with_cancellation(token),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        let ctx = workflow.activity(err.context().unwrap()).unwrap();
        assert_eq!(ctx.status().fault().map(|f| f.cancelled), Some(true));
        assert_eq!(telemetry.names(), vec!["activity_started", "activity_cancelled"]);
    }

    #[tokio::test]
    async fn cancelling_a_parent_cancels_the_child_it_was_waiting_on() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let invoker = invoker(telemetry.clone());
        let mut workflow = workflow();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = invoker
            .invoke(
                &mut workflow,
                Arc::new(Supervisor),
                ActivityInvocationOptions::default().with_cancellation(token),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(err.activity_id(), Some("supervisor"));

        let parent = err.context().unwrap();
        let children = workflow.children_of(parent).unwrap().to_vec();
        assert_eq!(children.len(), 1);
        for id in [parent, children[0]] {
            let ctx = workflow.activity(id).unwrap();
            assert_eq!(ctx.status().fault().map(|f| f.cancelled), Some(true));
            assert_eq!(ctx.finished_at_ms(), Some(1_000));
        }
        assert!(
            workflow
                .activities()
                .all(|ctx| !matches!(ctx.status(), ActivityStatus::Running))
        );
        assert_eq!(
            telemetry.names(),
            vec![
                "activity_started",
                "activity_started",
                "activity_cancelled",
                "activity_cancelled"
            ]
        );
        let (_, props) = telemetry.last().unwrap();
        assert_eq!(props["activity_id"], "supervisor");
        workflow.prune(parent).unwrap();
    }

    #[tokio::test]
    async fn children_get_their_own_input_and_see_parent_scope() {
        let invoker = invoker(Arc::new(RecordingTelemetry::default()));
        let mut workflow = workflow();

        let parent = invoker
            .invoke(
                &mut workflow,
                Arc::new(Sequence),
                ActivityInvocationOptions::default(),
            )
            .await
            .unwrap();

        let children = workflow.children_of(parent).unwrap().to_vec();
        assert_eq!(children.len(), 1);
        let child = workflow.activity(children[0]).unwrap();
        assert_eq!(child.parent(), Some(parent));
        assert_eq!(child.input().get("x"), Some(&Value::from(1)));

        let parent_scope = ScopeOwner::Activity(parent);
        assert_eq!(
            workflow.find_variable(parent_scope, "parent_input_x"),
            Some(&Value::from(2))
        );
        assert_eq!(
            workflow.find_variable(parent_scope, "child_status"),
            Some(&Value::from("completed"))
        );
        assert_eq!(
            workflow.find_variable(ScopeOwner::Activity(children[0]), "from_parent"),
            Some(&Value::from("visible"))
        );
        let child_ctx = ExpressionContext::for_activity(&workflow, children[0]);
        assert!(matches!(
            invoker.resolver().resolve("Input.x", child_ctx).await,
            Resolution::Value(v) if v == Value::from(1)
        ));
    }
}
