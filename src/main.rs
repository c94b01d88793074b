use std::{io, process, sync::Arc};

use prerender::{
    application::{
        error::{AppError, ErrorReport, exit_code},
        pipeline::{ExportPipeline, ExportPlan},
    },
    config,
    infra::{script_host::ScriptHostProvider, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    let outcome = run().await;
    if let Err(error) = &outcome {
        report_application_error(error);
        process::exit(exit_code(&outcome));
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error(error);
    let message = report.message();
    let emit = || {
        error!(
            target = "prerender",
            stage = report.stage,
            route = report.route.as_deref(),
            error = %message,
            "Prerender failed"
        );
    };

    if dispatcher::has_been_set() {
        emit();
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, emit);
}

async fn run() -> Result<(), AppError> {
    let (_cli, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let plan = ExportPlan::from_settings(&settings);
    info!(
        target = "prerender",
        export_root = %plan.export_root.display(),
        routes = plan.targets.len(),
        critical = plan.critical.is_some(),
        "Starting export"
    );

    let pipeline = ExportPipeline::new(Arc::new(ScriptHostProvider), plan);
    let report = pipeline.export().await?;

    info!(
        target = "prerender",
        written = report.len(),
        "Export finished"
    );
    Ok(())
}
