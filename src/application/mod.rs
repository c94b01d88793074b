//! Export pipeline: module host contracts, template composition, critical
//! CSS and the driver that ties them together.

pub mod critical;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod template;
