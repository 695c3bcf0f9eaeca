//! Execution context tree for a single workflow instance.
//!
//! The workflow context owns every activity context and every variable in
//! flat tables. Activity contexts refer to their parent by index and to
//! their variables by id, so scope walks are plain index traversals.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    core::{Error, Result, Value},
    runtime::{activity::Activity, scope::ScopeChain},
};

/// Index of an activity execution context inside its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId(pub(crate) usize);

impl ActivityId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a variable slot inside its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(pub(crate) usize);

/// The context that declared a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeOwner {
    Workflow,
    Activity(ActivityId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    scope: ScopeOwner,
    value: Option<Value>,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> ScopeOwner {
        self.scope
    }

    /// The settled value, or `None` while the variable has not been assigned yet.
    pub fn try_get(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

/// Identity of the workflow definition an instance was started from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowIdentity {
    pub definition_id: String,
    /// Identifier of the specific definition version.
    pub version_id: String,
    pub version: i32,
}

impl WorkflowIdentity {
    pub fn new(definition_id: impl Into<String>, version_id: impl Into<String>, version: i32) -> Self {
        Self {
            definition_id: definition_id.into(),
            version_id: version_id.into(),
            version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub message: String,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActivityStatus {
    NotStarted,
    Running,
    Suspended { bookmark: String },
    Completed,
    Faulted { fault: Fault },
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::NotStarted => "not_started",
            ActivityStatus::Running => "running",
            ActivityStatus::Suspended { .. } => "suspended",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Faulted { .. } => "faulted",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ActivityStatus::Completed | ActivityStatus::Faulted { .. }
        )
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            ActivityStatus::Faulted { fault } => Some(fault),
            _ => None,
        }
    }
}

/// Runtime state for one execution of one activity.
pub struct ActivityExecutionContext {
    pub(crate) id: ActivityId,
    pub(crate) execution_id: String,
    pub(crate) activity: Arc<dyn Activity>,
    pub(crate) input: HashMap<String, Value>,
    pub(crate) variables: Vec<VariableId>,
    pub(crate) status: ActivityStatus,
    pub(crate) parent: Option<ActivityId>,
    pub(crate) children: Vec<ActivityId>,
    pub(crate) started_at_ms: Option<u64>,
    pub(crate) finished_at_ms: Option<u64>,
    pub(crate) pruned: bool,
}

impl ActivityExecutionContext {
    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn activity(&self) -> &Arc<dyn Activity> {
        &self.activity
    }

    pub fn activity_type(&self) -> &str {
        self.activity.activity_type()
    }

    /// Input supplied for this invocation. Immutable once the invocation begins.
    pub fn input(&self) -> &HashMap<String, Value> {
        &self.input
    }

    pub fn status(&self) -> &ActivityStatus {
        &self.status
    }

    pub fn parent(&self) -> Option<ActivityId> {
        self.parent
    }

    pub fn children(&self) -> &[ActivityId] {
        &self.children
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        self.started_at_ms
    }

    pub fn finished_at_ms(&self) -> Option<u64> {
        self.finished_at_ms
    }
}

impl fmt::Debug for ActivityExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityExecutionContext")
            .field("id", &self.id)
            .field("execution_id", &self.execution_id)
            .field("activity", &self.activity.id())
            .field("activity_type", &self.activity.activity_type())
            .field("status", &self.status)
            .field("parent", &self.parent)
            .finish()
    }
}

/// Runtime state for one running workflow instance; root of the context tree.
#[derive(Debug)]
pub struct WorkflowExecutionContext {
    pub(crate) instance_id: String,
    pub(crate) identity: WorkflowIdentity,
    pub(crate) correlation_id: Option<String>,
    pub(crate) input: HashMap<String, Value>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) workflow_variables: Vec<VariableId>,
    pub(crate) activities: Vec<ActivityExecutionContext>,
    pub(crate) roots: Vec<ActivityId>,
}

impl WorkflowExecutionContext {
    pub fn new(identity: WorkflowIdentity) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            identity,
            correlation_id: None,
            input: HashMap::new(),
            variables: Vec::new(),
            workflow_variables: Vec::new(),
            activities: Vec::new(),
            roots: Vec::new(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
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

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn identity(&self) -> &WorkflowIdentity {
        &self.identity
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn input(&self) -> &HashMap<String, Value> {
        &self.input
    }

    pub fn activity(&self, id: ActivityId) -> Result<&ActivityExecutionContext> {
        self.activities
            .get(id.0)
            .filter(|ctx| !ctx.pruned)
            .ok_or_else(|| Error::UnknownActivity(id.to_string()))
    }

    pub(crate) fn activity_mut(&mut self, id: ActivityId) -> Result<&mut ActivityExecutionContext> {
        self.activities
            .get_mut(id.0)
            .filter(|ctx| !ctx.pruned)
            .ok_or_else(|| Error::UnknownActivity(id.to_string()))
    }

    /// Live activity contexts in creation order.
    pub fn activities(&self) -> impl Iterator<Item = &ActivityExecutionContext> {
        self.activities.iter().filter(|ctx| !ctx.pruned)
    }

    pub fn root_activities(&self) -> &[ActivityId] {
        &self.roots
    }

    pub fn children_of(&self, id: ActivityId) -> Result<&[ActivityId]> {
        Ok(self.activity(id)?.children())
    }

    /// Parent chain of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: ActivityId) -> Result<Vec<ActivityId>> {
        let mut chain = Vec::new();
        let mut current = self.activity(id)?.parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.activity(parent)?.parent;
        }
        Ok(chain)
    }

    /// Variables visible from `scope`, nearest scope first.
    pub fn scope_chain(&self, scope: ScopeOwner) -> ScopeChain<'_> {
        ScopeChain::new(self, scope)
    }

    /// Declares a variable in the workflow's own scope.
    pub fn declare_workflow_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bind(ScopeOwner::Workflow, name.into(), Some(value.into()));
    }

    /// Declares `name` in `scope`. Re-declaring a name in the same scope rebinds
    /// the existing slot. `None` declares the variable without a settled value.
    /// Fails with `UnknownActivity` when `scope` is not a live activity context.
    pub fn declare_variable(
        &mut self,
        scope: ScopeOwner,
        name: impl Into<String>,
        value: Option<Value>,
    ) -> Result<VariableId> {
        self.ensure_live(scope)?;
        Ok(self.bind(scope, name.into(), value))
    }

    /// Assigns `name` as seen from `scope`: the nearest declaration in the chain
    /// receives the value, otherwise the variable is declared in `scope` itself.
    pub fn set_variable(
        &mut self,
        scope: ScopeOwner,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.ensure_live(scope)?;
        let name = name.into();
        let target = self
            .scope_ids(scope)
            .into_iter()
            .flat_map(|owner| self.scope_variables(owner).iter().copied())
            .find(|id| self.variables[id.0].name == name);
        match target {
            Some(id) => self.variables[id.0].value = Some(value.into()),
            None => {
                self.bind(scope, name, Some(value.into()));
            }
        }
        Ok(())
    }

    /// Nearest settled value of `name` visible from `scope`.
    pub fn find_variable(&self, scope: ScopeOwner, name: &str) -> Option<&Value> {
        self.scope_chain(scope).lookup(name)
    }

    pub(crate) fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    pub(crate) fn scope_variables(&self, scope: ScopeOwner) -> &[VariableId] {
        match scope {
            ScopeOwner::Workflow => &self.workflow_variables,
            ScopeOwner::Activity(id) => self
                .activities
                .get(id.0)
                .map(|ctx| ctx.variables.as_slice())
                .unwrap_or(&[]),
        }
    }

    pub(crate) fn parent_scope(&self, scope: ScopeOwner) -> Option<ScopeOwner> {
        match scope {
            ScopeOwner::Workflow => None,
            ScopeOwner::Activity(id) => Some(
                self.activities
                    .get(id.0)
                    .and_then(|ctx| ctx.parent)
                    .map(ScopeOwner::Activity)
                    .unwrap_or(ScopeOwner::Workflow),
            ),
        }
    }

    fn scope_ids(&self, scope: ScopeOwner) -> Vec<ScopeOwner> {
        let mut owners = vec![scope];
        let mut current = scope;
        while let Some(parent) = self.parent_scope(current) {
            owners.push(parent);
            current = parent;
        }
        owners
    }

    fn ensure_live(&self, scope: ScopeOwner) -> Result<()> {
        if let ScopeOwner::Activity(id) = scope {
            self.activity(id)?;
        }
        Ok(())
    }

    /// Binds `name` in a scope already known to be live.
    fn bind(&mut self, scope: ScopeOwner, name: String, value: Option<Value>) -> VariableId {
        if let Some(existing) = self.local_variable(scope, &name) {
            self.variables[existing.0].value = value;
            return existing;
        }
        let id = VariableId(self.variables.len());
        self.variables.push(Variable {
            name,
            scope,
            value,
        });
        match scope {
            ScopeOwner::Workflow => self.workflow_variables.push(id),
            ScopeOwner::Activity(activity) => self.activities[activity.0].variables.push(id),
        }
        id
    }

    fn local_variable(&self, scope: ScopeOwner, name: &str) -> Option<VariableId> {
        self.scope_variables(scope)
            .iter()
            .copied()
            .find(|id| self.variables[id.0].name == name)
    }

    /// Creates a new, not-yet-started activity context under `parent` (or as a root).
    pub(crate) fn attach_activity(
        &mut self,
        activity: Arc<dyn Activity>,
        parent: Option<ActivityId>,
        input: HashMap<String, Value>,
    ) -> Result<ActivityId> {
        if let Some(parent) = parent {
            self.activity(parent)?;
        }
        let id = ActivityId(self.activities.len());
        self.activities.push(ActivityExecutionContext {
            id,
            execution_id: Uuid::new_v4().to_string(),
            activity,
            input,
            variables: Vec::new(),
            status: ActivityStatus::NotStarted,
            parent,
            children: Vec::new(),
            started_at_ms: None,
            finished_at_ms: None,
            pruned: false,
        });
        match parent {
            Some(parent) => self.activities[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    /// Drops a finished activity subtree. Its variables are released and the
    /// context can no longer be addressed.
    pub fn prune(&mut self, id: ActivityId) -> Result<()> {
        let subtree = self.subtree(id)?;
        for member in &subtree {
            let ctx = self.activity(*member)?;
            if !ctx.status.is_finished() {
                return Err(Error::InvalidState(format!(
                    "Activity {member} is {} and cannot be pruned",
                    ctx.status.as_str()
                )));
            }
        }
        let parent = self.activity(id)?.parent;
        match parent {
            Some(parent) => self.activities[parent.0].children.retain(|c| *c != id),
            None => self.roots.retain(|r| *r != id),
        }
        for member in subtree {
            let ctx = &mut self.activities[member.0];
            ctx.pruned = true;
            let released = std::mem::take(&mut ctx.variables);
            for variable in released {
                self.variables[variable.0].value = None;
            }
        }
        Ok(())
    }

    /// `id` and every live descendant.
    pub(crate) fn subtree(&self, id: ActivityId) -> Result<Vec<ActivityId>> {
        let mut pending = vec![id];
        let mut collected = Vec::new();
        while let Some(next) = pending.pop() {
            pending.extend(self.activity(next)?.children.iter().copied());
            collected.push(next);
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::noop;

    fn workflow() -> WorkflowExecutionContext {
        WorkflowExecutionContext::new(WorkflowIdentity::new("def", "def:1", 1))
    }

    #[test]
    fn tree_links_parents_and_children() {
        let mut wf = workflow();
        let root = wf.attach_activity(noop("root"), None, HashMap::new()).unwrap();
        let child = wf.attach_activity(noop("child"), Some(root), HashMap::new()).unwrap();
        let grandchild = wf
            .attach_activity(noop("grandchild"), Some(child), HashMap::new())
            .unwrap();

        assert_eq!(wf.root_activities(), &[root]);
        assert_eq!(wf.children_of(root).unwrap(), &[child]);
        assert_eq!(wf.ancestors(grandchild).unwrap(), vec![child, root]);
        assert!(matches!(
            wf.attach_activity(noop("orphan"), Some(ActivityId(99)), HashMap::new()),
            Err(Error::UnknownActivity(_))
        ));
    }

    #[test]
    fn redeclaring_in_the_same_scope_rebinds() {
        let mut wf = workflow();
        let first = wf.declare_variable(ScopeOwner::Workflow, "x", None).unwrap();
        let second = wf
            .declare_variable(ScopeOwner::Workflow, "x", Some(Value::from(3)))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(wf.find_variable(ScopeOwner::Workflow, "x"), Some(&Value::from(3)));
    }

    #[test]
    fn prune_releases_finished_subtrees_only() {
        let mut wf = workflow();
        let root = wf.attach_activity(noop("root"), None, HashMap::new()).unwrap();
        let child = wf.attach_activity(noop("child"), Some(root), HashMap::new()).unwrap();
        wf.declare_variable(ScopeOwner::Activity(child), "scratch", Some(Value::from(1)))
            .unwrap();

        wf.activity_mut(root).unwrap().status = ActivityStatus::Completed;
        assert!(matches!(wf.prune(root), Err(Error::InvalidState(_))));

        wf.activity_mut(child).unwrap().status = ActivityStatus::Completed;
        wf.prune(root).unwrap();

        assert!(wf.root_activities().is_empty());
        assert!(matches!(wf.activity(child), Err(Error::UnknownActivity(_))));
        assert_eq!(wf.activities().count(), 0);
    }

    #[test]
    fn variables_cannot_be_bound_to_dead_scopes() {
        let mut wf = workflow();
        let step = wf.attach_activity(noop("step"), None, HashMap::new()).unwrap();
        wf.activity_mut(step).unwrap().status = ActivityStatus::Completed;
        wf.prune(step).unwrap();
        let slots = wf.variables.len();

        let pruned = ScopeOwner::Activity(step);
        assert!(matches!(
            wf.declare_variable(pruned, "late", Some(Value::from(1))),
            Err(Error::UnknownActivity(_))
        ));
        assert!(matches!(
            wf.set_variable(pruned, "late", 1),
            Err(Error::UnknownActivity(_))
        ));
        assert!(matches!(
            wf.declare_variable(ScopeOwner::Activity(ActivityId(42)), "ghost", None),
            Err(Error::UnknownActivity(_))
        ));
        assert_eq!(wf.variables.len(), slots);
    }
}
