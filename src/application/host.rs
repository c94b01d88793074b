//! Contracts for the service that loads the server-rendering module.
//!
//! The pipeline only ever sees these traits: the concrete host (an embedded
//! script engine in production, counters and canned fragments in tests) is
//! chosen by the binary.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::{config::ModuleSettings, domain::route::Route};

/// Which module to load and which of its exports renders a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub entry: PathBuf,
    pub export: String,
}

impl From<&ModuleSettings> for ModuleSpec {
    fn from(settings: &ModuleSettings) -> Self {
        Self {
            entry: settings.entry.clone(),
            export: settings.export.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModuleLoadError {
    #[error("module host failed to start: {message}")]
    Startup { message: String },
    #[error("module `{}` could not be read", path.display())]
    Unresolved {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("module `{}` threw during evaluation: {message}", path.display())]
    Evaluation { path: PathBuf, message: String },
    #[error("module `{}` does not export a function named `{export}`", path.display())]
    MissingExport { path: PathBuf, export: String },
    #[error("module host is not running")]
    HostUnavailable,
}

impl ModuleLoadError {
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }
}

/// Why a single render call failed.
#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error("render function threw: {0}")]
    Threw(String),
    #[error("module host is not running")]
    HostUnavailable,
}

/// Starts module hosts. One host is acquired per export run.
#[async_trait]
pub trait HostProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn ModuleHost>, ModuleLoadError>;
}

/// A running module-loading service.
#[async_trait]
pub trait ModuleHost: Send {
    /// Load `module.entry` and return its render export.
    async fn load(&mut self, module: &ModuleSpec) -> Result<Box<dyn RenderFn>, ModuleLoadError>;

    /// Stop the service. Safe to call more than once; later calls do nothing.
    async fn release(&mut self);
}

/// The loaded `render(route) -> html` export.
#[async_trait]
pub trait RenderFn: Send + Sync {
    async fn render(&self, route: &Route) -> Result<String, RenderFailure>;
}
