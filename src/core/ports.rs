use std::collections::HashMap;

use serde_json::Value as Json;

/// Abstraction for getting the current time.
pub trait Clock: Send + Sync {
    /// Get the current UTC timestamp in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Abstraction for sending telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Record a generic event.
    fn record_event(&self, event_name: &str, properties: HashMap<String, String>);
}

/// Hierarchical configuration exposed to expressions as `Configuration.<name>`.
///
/// Paths use `:` to separate nested section names, so `a:b` addresses
/// section `b` of section `a`.
pub trait ConfigurationProvider: Send + Sync {
    /// Returns the raw content of the section at `path`, or `None` if it does not exist.
    fn get_section(&self, path: &str) -> Option<Json>;
}
