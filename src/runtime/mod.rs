pub mod activity;
pub mod context;
pub mod invoker;
pub mod scope;
pub mod snapshot;
#[cfg(test)]
pub(crate) mod test_support;

pub use activity::{Activity, ActivityCatalog, ActivityOutcome, ActivityScope};
pub use context::{
    ActivityExecutionContext, ActivityId, ActivityStatus, Fault, ScopeOwner, Variable,
    WorkflowExecutionContext, WorkflowIdentity,
};
pub use invoker::{ActivityInvocationOptions, ActivityInvoker};
pub use scope::ScopeChain;
pub use snapshot::{ActivitySnapshot, VariableSnapshot, WorkflowSnapshot};
