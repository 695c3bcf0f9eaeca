pub mod outbound;
pub mod templating;

pub use outbound::{clock::SystemClock, configuration::YamlConfiguration, telemetry::TracingTelemetrySink};
pub use templating::{HandlebarsRenderer, RenderOutput};
