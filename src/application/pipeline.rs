//! Drives one export run: acquire the module host, render every target,
//! compose, transform and write it, then release the host.
//!
//! The run stops at the first fatal error. Files written before the failure
//! are left in place, and the host is released on every path.

use std::{fmt, path::PathBuf, sync::Arc, time::Instant};

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    application::{
        critical::{CriticalCss, CriticalOptions},
        host::{HostProvider, ModuleHost, ModuleLoadError, ModuleSpec, RenderFailure},
        template::{MountPoint, Template, TemplateError},
    },
    config::Settings,
    domain::route::{ExportTarget, Route, export_targets},
    infra::output::{FileWriteError, RouteWriter},
};

pub const METRIC_ROUTES_WRITTEN: &str = "prerender_routes_written_total";
pub const METRIC_ROUTE_MS: &str = "prerender_route_ms";

/// Driver states, in the order a run passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Starting the host, loading the render module and reading the template.
    Acquiring,
    Rendering { index: usize },
    Composing,
    Transforming,
    Writing,
    Releasing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Acquiring => "acquiring",
            PipelineState::Rendering { .. } => "rendering",
            PipelineState::Composing => "composing",
            PipelineState::Transforming => "transforming",
            PipelineState::Writing => "writing",
            PipelineState::Releasing => "releasing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Rendering { index } => write!(f, "rendering[{index}]"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("module host could not be acquired: {0}")]
    Acquire(#[source] ModuleLoadError),
    #[error("render module could not be loaded: {0}")]
    ModuleLoad(#[source] ModuleLoadError),
    #[error("{0}")]
    Template(#[from] TemplateError),
    #[error("rendering `{route}` failed: {source}")]
    Render {
        route: Route,
        #[source]
        source: RenderFailure,
    },
    #[error("writing `{route}` failed: {source}")]
    FileWrite {
        route: Route,
        #[source]
        source: FileWriteError,
    },
}

impl ExportError {
    /// The stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            ExportError::Acquire(_) => "acquiring",
            ExportError::ModuleLoad(_) => "loading",
            ExportError::Template(_) => "template",
            ExportError::Render { .. } => "rendering",
            ExportError::FileWrite { .. } => "writing",
        }
    }

    pub fn route(&self) -> Option<&Route> {
        match self {
            ExportError::Render { route, .. } | ExportError::FileWrite { route, .. } => Some(route),
            ExportError::Acquire(_) | ExportError::ModuleLoad(_) | ExportError::Template(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedRoute {
    pub route: Route,
    pub path: PathBuf,
}

/// Everything a successful run wrote, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub routes: Vec<ExportedRoute>,
}

impl ExportReport {
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Outcome of a run together with the states the driver went through.
#[derive(Debug)]
pub struct ExportRun {
    pub trace: Vec<PipelineState>,
    pub outcome: Result<ExportReport, ExportError>,
}

/// What to export and where.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub module: ModuleSpec,
    pub template_path: PathBuf,
    pub mount: MountPoint,
    pub require_placeholder: bool,
    pub targets: Vec<ExportTarget>,
    pub export_root: PathBuf,
    /// `None` writes composed documents as they are.
    pub critical: Option<CriticalCss>,
}

impl ExportPlan {
    pub fn from_settings(settings: &Settings) -> Self {
        let export = &settings.export;
        let critical = settings.critical.enabled.then(|| {
            let mut options = CriticalOptions::new(&export.root);
            options.preload = settings.critical.preload;
            options.noscript_fallback = settings.critical.noscript_fallback;
            options.inline_fonts = settings.critical.inline_fonts;
            options.preload_fonts = settings.critical.preload_fonts;
            options.keyframes = settings.critical.keyframes;
            options.reduce_inline_styles = settings.critical.reduce_inline_styles;
            CriticalCss::new(options)
        });

        Self {
            module: ModuleSpec::from(&settings.module),
            template_path: export.template_path(),
            mount: MountPoint::new(&settings.mount.element_id),
            require_placeholder: settings.mount.require_placeholder,
            targets: export_targets(&export.routes, export.not_found_route.as_ref()),
            export_root: export.root.clone(),
            critical,
        }
    }
}

struct Trace(Vec<PipelineState>);

impl Trace {
    fn new() -> Self {
        Self(vec![PipelineState::Idle])
    }

    fn enter(&mut self, state: PipelineState) {
        debug!(target = "prerender::pipeline", state = %state, "Pipeline state changed");
        self.0.push(state);
    }
}

pub struct ExportPipeline {
    provider: Arc<dyn HostProvider>,
    plan: ExportPlan,
    writer: RouteWriter,
}

impl ExportPipeline {
    pub fn new(provider: Arc<dyn HostProvider>, plan: ExportPlan) -> Self {
        let writer = RouteWriter::new(plan.export_root.clone());
        Self {
            provider,
            plan,
            writer,
        }
    }

    pub async fn export(&self) -> Result<ExportReport, ExportError> {
        self.run().await.outcome
    }

    pub async fn run(&self) -> ExportRun {
        let mut trace = Trace::new();
        trace.enter(PipelineState::Acquiring);

        let outcome = match self.provider.acquire().await {
            Ok(mut host) => {
                let outcome = self.export_with(host.as_mut(), &mut trace).await;
                trace.enter(PipelineState::Releasing);
                host.release().await;
                outcome
            }
            Err(err) => {
                trace.enter(PipelineState::Releasing);
                Err(ExportError::Acquire(err))
            }
        };

        trace.enter(if outcome.is_ok() {
            PipelineState::Done
        } else {
            PipelineState::Failed
        });

        ExportRun {
            trace: trace.0,
            outcome,
        }
    }

    async fn export_with(
        &self,
        host: &mut dyn ModuleHost,
        trace: &mut Trace,
    ) -> Result<ExportReport, ExportError> {
        let render = host
            .load(&self.plan.module)
            .await
            .map_err(ExportError::ModuleLoad)?;
        let template = Template::load(
            &self.plan.template_path,
            self.plan.mount.clone(),
            self.plan.require_placeholder,
        )
        .await?;

        let mut report = ExportReport::default();
        for (index, target) in self.plan.targets.iter().enumerate() {
            let started = Instant::now();
            let route = target.route();

            trace.enter(PipelineState::Rendering { index });
            let fragment = render
                .render(route)
                .await
                .map_err(|source| ExportError::Render {
                    route: route.clone(),
                    source,
                })?;

            trace.enter(PipelineState::Composing);
            let document = template.compose(&fragment);

            trace.enter(PipelineState::Transforming);
            let document = match &self.plan.critical {
                Some(critical) => critical.process(&document),
                None => document,
            };

            trace.enter(PipelineState::Writing);
            let path = self
                .writer
                .write(target, &document)
                .await
                .map_err(|source| ExportError::FileWrite {
                    route: route.clone(),
                    source,
                })?;

            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            counter!(METRIC_ROUTES_WRITTEN).increment(1);
            histogram!(METRIC_ROUTE_MS).record(elapsed_ms);
            info!(
                target = "prerender::pipeline",
                route = %route,
                path = %path.display(),
                elapsed_ms,
                "Prerendered route"
            );

            report.routes.push(ExportedRoute {
                route: route.clone(),
                path,
            });
        }

        Ok(report)
    }
}
