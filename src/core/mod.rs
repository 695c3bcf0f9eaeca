pub mod config;
pub mod error;
pub mod ports;
pub mod value;

pub use config::*;
pub use error::{Error, Result};
pub use value::{ObjectValue, Value};
