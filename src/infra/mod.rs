//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod output;
pub mod script_host;
pub mod telemetry;
