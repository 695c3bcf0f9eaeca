use std::slice;

use crate::{
    core::Value,
    runtime::context::{ScopeOwner, Variable, VariableId, WorkflowExecutionContext},
};

/// Lazy, nearest-first walk over every variable visible from a scope.
///
/// Yields the scope's own declarations first, then its parent's, up to the
/// workflow scope. Siblings and descendants are never visited.
pub struct ScopeChain<'a> {
    workflow: &'a WorkflowExecutionContext,
    current: Option<ScopeOwner>,
    pending: slice::Iter<'a, VariableId>,
}

impl<'a> ScopeChain<'a> {
    pub(crate) fn new(workflow: &'a WorkflowExecutionContext, scope: ScopeOwner) -> Self {
        Self {
            workflow,
            current: Some(scope),
            pending: workflow.scope_variables(scope).iter(),
        }
    }

    /// First binding named `name` that currently holds a value.
    ///
    /// Unsettled bindings are skipped rather than shadowing outer ones.
    pub fn lookup(self, name: &str) -> Option<&'a Value> {
        self.filter(|variable| variable.name() == name)
            .find_map(Variable::try_get)
    }
}

impl<'a> Iterator for ScopeChain<'a> {
    type Item = &'a Variable;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.pending.next() {
                return Some(self.workflow.variable(*id));
            }
            let parent = self.workflow.parent_scope(self.current?);
            self.current = parent;
            self.pending = match parent {
                Some(scope) => self.workflow.scope_variables(scope).iter(),
                None => Default::default(),
            };
            self.current?;
        }
    }
}
