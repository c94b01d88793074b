use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the prerender binary.
///
/// Every flag is optional; without any, settings come from configuration
/// files and the environment.
#[derive(Debug, Parser, Default, Clone)]
#[command(
    name = "prerender",
    version,
    about = "Prerender application routes into static HTML files"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PRERENDER_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    /// Override the export root (the client build output directory).
    #[arg(long = "export-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub export_root: Option<PathBuf>,

    /// Override the template path, relative to the export root.
    #[arg(long = "template", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub template: Option<PathBuf>,

    /// Override the server-rendering module entry.
    #[arg(long = "module-entry", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub module_entry: Option<PathBuf>,

    /// Route to prerender; repeat to export several. Replaces configured routes.
    #[arg(long = "route", value_name = "ROUTE", action = ArgAction::Append)]
    pub routes: Vec<String>,

    /// Route whose output is also written to `404.html`.
    #[arg(long = "not-found-route", value_name = "ROUTE")]
    pub not_found_route: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Write composed documents without inlining critical CSS.
    #[arg(long = "no-critical", action = ArgAction::SetTrue)]
    pub no_critical: bool,

    /// Override how deferred stylesheets load (media|swap|body|none).
    #[arg(long = "critical-preload", value_name = "STRATEGY")]
    pub critical_preload: Option<String>,
}
