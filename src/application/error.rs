use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::pipeline::ExportError, config::LoadError, domain::error::DomainError,
    domain::route::Route, infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] LoadError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    /// Stage named in the failure report.
    pub fn stage(&self) -> &'static str {
        match self {
            AppError::Export(err) => err.stage(),
            AppError::Configuration(_) | AppError::Domain(_) => "configuration",
            AppError::Infra(InfraError::Telemetry(_)) => "telemetry",
        }
    }

    pub fn route(&self) -> Option<&Route> {
        match self {
            AppError::Export(err) => err.route(),
            _ => None,
        }
    }
}

/// What the binary prints when a run fails.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub stage: &'static str,
    pub route: Option<String>,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(error: &AppError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            let message = inner.to_string();
            // Wrapping errors often repeat their source in their own message.
            if messages.last().is_none_or(|outer| !outer.contains(&message)) {
                messages.push(message);
            }
            current = inner.source();
        }

        Self {
            stage: error.stage(),
            route: error.route().map(ToString::to_string),
            messages,
        }
    }

    /// The error chain on one line, outermost first.
    pub fn message(&self) -> String {
        self.messages.join(": ")
    }
}

/// Process exit status for a finished run.
pub fn exit_code<T>(outcome: &Result<T, AppError>) -> i32 {
    match outcome {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
