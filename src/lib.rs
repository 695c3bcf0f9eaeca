#![warn(clippy::uninlined_format_args)]

pub mod adapters;
pub mod config;
pub mod core;
pub mod engine;
pub mod expressions;
pub mod logging;
pub mod runtime;

pub use crate::config::EngineConfig;
pub use crate::core::{Error, Result, Value};
pub use crate::engine::{Engine, EngineBuilder};
