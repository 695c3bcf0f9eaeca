use std::collections::HashMap;

use tracing::event;

use crate::core::ports::TelemetrySink;

/// Forwards lifecycle events to `tracing` under the `flowscope::telemetry` target.
#[derive(Debug, Default)]
pub struct TracingTelemetrySink;

impl TracingTelemetrySink {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetrySink for TracingTelemetrySink {
    fn record_event(&self, event_name: &str, properties: HashMap<String, String>) {
        event!(target: "flowscope::telemetry", tracing::Level::INFO, %event_name, props = ?properties);
    }
}
