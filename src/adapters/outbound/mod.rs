pub mod clock;
pub mod configuration;
pub mod telemetry;
