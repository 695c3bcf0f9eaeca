//! Serializable capture of a workflow instance's execution state, so a
//! suspended activity can be resumed by any worker after rehydration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    core::{Error, Result, Value},
    runtime::{
        activity::ActivityCatalog,
        context::{
            ActivityExecutionContext, ActivityId, ActivityStatus, ScopeOwner, VariableId,
            WorkflowExecutionContext, WorkflowIdentity,
        },
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    pub name: String,
    pub value: Value,
    /// False for a declared variable that has not been assigned yet.
    pub settled: bool,
}

impl VariableSnapshot {
    fn into_binding(self) -> (String, Option<Value>) {
        let value = self.settled.then_some(self.value);
        (self.name, value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub id: ActivityId,
    pub execution_id: String,
    pub activity_id: String,
    pub activity_type: String,
    pub parent: Option<ActivityId>,
    pub children: Vec<ActivityId>,
    pub input: HashMap<String, Value>,
    pub variables: Vec<VariableSnapshot>,
    pub status: ActivityStatus,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    #[serde(default)]
    pub pruned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub instance_id: String,
    pub identity: WorkflowIdentity,
    pub correlation_id: Option<String>,
    pub input: HashMap<String, Value>,
    pub variables: Vec<VariableSnapshot>,
    pub activities: Vec<ActivitySnapshot>,
    pub roots: Vec<ActivityId>,
}

impl WorkflowSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Snapshot(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Snapshot(e.to_string()))
    }
}

impl WorkflowExecutionContext {
    /// Captures the full context tree. Typed object values are stored through
    /// their JSON projection.
    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            instance_id: self.instance_id.clone(),
            identity: self.identity.clone(),
            correlation_id: self.correlation_id.clone(),
            input: self.input.clone(),
            variables: self.snapshot_variables(&self.workflow_variables),
            activities: self
                .activities
                .iter()
                .map(|ctx| self.snapshot_activity(ctx))
                .collect(),
            roots: self.roots.clone(),
        }
    }

    /// Rebuilds a context tree from `snapshot`, rebinding each activity
    /// context to its behaviour from `catalog`.
    pub fn rehydrate(snapshot: WorkflowSnapshot, catalog: &ActivityCatalog) -> Result<Self> {
        let mut workflow = WorkflowExecutionContext {
            instance_id: snapshot.instance_id,
            identity: snapshot.identity,
            correlation_id: snapshot.correlation_id,
            input: snapshot.input,
            variables: Vec::new(),
            workflow_variables: Vec::new(),
            activities: Vec::with_capacity(snapshot.activities.len()),
            roots: snapshot.roots,
        };

        for (index, activity) in snapshot.activities.iter().enumerate() {
            if activity.id.index() != index {
                return Err(Error::Snapshot(format!(
                    "Activity {} stored at position {index}",
                    activity.id
                )));
            }
            let behaviour = catalog
                .get(&activity.activity_id)
                .ok_or_else(|| Error::UnregisteredActivity(activity.activity_id.clone()))?;
            workflow.activities.push(ActivityExecutionContext {
                id: activity.id,
                execution_id: activity.execution_id.clone(),
                activity: behaviour,
                input: activity.input.clone(),
                variables: Vec::new(),
                status: activity.status.clone(),
                parent: activity.parent,
                children: activity.children.clone(),
                started_at_ms: activity.started_at_ms,
                finished_at_ms: activity.finished_at_ms,
                pruned: activity.pruned,
            });
        }

        for variable in snapshot.variables {
            let (name, value) = variable.into_binding();
            workflow.declare_variable(ScopeOwner::Workflow, name, value)?;
        }
        for activity in snapshot.activities {
            if activity.pruned {
                continue;
            }
            for variable in activity.variables {
                let (name, value) = variable.into_binding();
                workflow.declare_variable(ScopeOwner::Activity(activity.id), name, value)?;
            }
        }
        Ok(workflow)
    }

    fn snapshot_activity(&self, ctx: &ActivityExecutionContext) -> ActivitySnapshot {
        ActivitySnapshot {
            id: ctx.id,
            execution_id: ctx.execution_id.clone(),
            activity_id: ctx.activity.id().to_string(),
            activity_type: ctx.activity.activity_type().to_string(),
            parent: ctx.parent,
            children: ctx.children.clone(),
            input: ctx.input.clone(),
            variables: self.snapshot_variables(&ctx.variables),
            status: ctx.status.clone(),
            started_at_ms: ctx.started_at_ms,
            finished_at_ms: ctx.finished_at_ms,
            pruned: ctx.pruned,
        }
    }

    fn snapshot_variables(&self, ids: &[VariableId]) -> Vec<VariableSnapshot> {
        ids.iter()
            .map(|id| {
                let variable = self.variable(*id);
                VariableSnapshot {
                    name: variable.name().to_string(),
                    value: variable.try_get().cloned().unwrap_or_default(),
                    settled: variable.try_get().is_some(),
                }
            })
            .collect()
    }
}
