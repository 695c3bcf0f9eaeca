use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    core::{
        ResolverOptions,
        ports::{Clock, TelemetrySink},
    },
    expressions::{MemberAccessRegistry, SymbolResolver},
    runtime::{
        activity::{Activity, ActivityOutcome, ActivityScope},
        invoker::ActivityInvoker,
    },
};

/// Completes immediately without touching its context.
pub(crate) struct Noop {
    id: String,
}

#[async_trait]
impl Activity for Noop {
    fn id(&self) -> &str {
        &self.id
    }

    fn activity_type(&self) -> &str {
        "Noop"
    }

    async fn execute(&self, _scope: &mut ActivityScope<'_>) -> anyhow::Result<ActivityOutcome> {
        Ok(ActivityOutcome::Completed)
    }
}

pub(crate) fn noop(id: &str) -> Arc<dyn Activity> {
    Arc::new(Noop { id: id.to_string() })
}

/// Parks on first execution and completes on resume, counting its runs in
/// the `step` variable.
pub(crate) struct Approval {
    id: String,
}

pub(crate) fn approval(id: &str) -> Arc<dyn Activity> {
    Arc::new(Approval { id: id.to_string() })
}

#[async_trait]
impl Activity for Approval {
    fn id(&self) -> &str {
        &self.id
    }

    fn activity_type(&self) -> &str {
        "Approval"
    }

    async fn execute(&self, scope: &mut ActivityScope<'_>) -> anyhow::Result<ActivityOutcome> {
        scope.declare_variable("step", 1)?;
        Ok(ActivityOutcome::suspend("approval"))
    }

    async fn resume(&self, scope: &mut ActivityScope<'_>, bookmark: &str) -> anyhow::Result<ActivityOutcome> {
        anyhow::ensure!(bookmark == "approval", "unexpected bookmark {bookmark}");
        let step = scope
            .variable("step")
            .and_then(|v| v.as_json())
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        scope.set_variable("step", step + 1)?;
        Ok(ActivityOutcome::Completed)
    }
}

pub(crate) struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

#[derive(Default)]
pub(crate) struct RecordingTelemetry {
    events: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl RecordingTelemetry {
    pub(crate) fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn last(&self) -> Option<(String, HashMap<String, String>)> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_event(&self, event_name: &str, properties: HashMap<String, String>) {
        self.events
            .lock()
            .unwrap()
            .push((event_name.to_string(), properties));
    }
}

/// An invoker over an empty registry with configuration access disabled.
pub(crate) fn invoker(telemetry: Arc<RecordingTelemetry>) -> ActivityInvoker {
    let resolver = SymbolResolver::new(
        Arc::new(MemberAccessRegistry::builder().build()),
        ResolverOptions::default(),
    );
    ActivityInvoker::new(resolver, Arc::new(FixedClock(1_000)), telemetry)
}
