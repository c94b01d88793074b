//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    application::critical::{KeyframesStrategy, PreloadStrategy},
    domain::route::{Route, RouteList},
};

pub use cli::CliArgs;

const DEFAULT_CONFIG_BASENAME: &str = "config/prerender";
const LOCAL_CONFIG_BASENAME: &str = "prerender";
const ENV_PREFIX: &str = "PRERENDER";
const DEFAULT_EXPORT_ROOT: &str = "dist";
const DEFAULT_TEMPLATE: &str = "index.html";
const DEFAULT_ROUTE: &str = "/";
const DEFAULT_MODULE_ENTRY: &str = "dist/server/entry-server.js";
const DEFAULT_MODULE_EXPORT: &str = "render";
const DEFAULT_MOUNT_ELEMENT_ID: &str = "root";

/// Fully-resolved export settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub export: ExportSettings,
    pub module: ModuleSettings,
    pub mount: MountSettings,
    pub critical: CriticalSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub root: PathBuf,
    /// Relative paths resolve against `root`.
    pub template: PathBuf,
    pub routes: RouteList,
    pub not_found_route: Option<Route>,
}

impl ExportSettings {
    pub fn template_path(&self) -> PathBuf {
        self.root.join(&self.template)
    }
}

#[derive(Debug, Clone)]
pub struct ModuleSettings {
    pub entry: PathBuf,
    pub export: String,
}

#[derive(Debug, Clone)]
pub struct MountSettings {
    pub element_id: String,
    pub require_placeholder: bool,
}

#[derive(Debug, Clone)]
pub struct CriticalSettings {
    pub enabled: bool,
    pub preload: PreloadStrategy,
    pub noscript_fallback: bool,
    pub inline_fonts: bool,
    pub preload_fonts: bool,
    pub keyframes: KeyframesStrategy,
    pub reduce_inline_styles: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("export.routes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli_overrides(cli);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    export: RawExportSettings,
    module: RawModuleSettings,
    mount: RawMountSettings,
    critical: RawCriticalSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(root) = cli.export_root.as_ref() {
            self.export.root = Some(root.clone());
        }
        if let Some(template) = cli.template.as_ref() {
            self.export.template = Some(template.clone());
        }
        if !cli.routes.is_empty() {
            self.export.routes = Some(cli.routes.clone());
        }
        if let Some(route) = cli.not_found_route.as_ref() {
            self.export.not_found_route = Some(route.clone());
        }
        if let Some(entry) = cli.module_entry.as_ref() {
            self.module.entry = Some(entry.clone());
        }
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }
        if cli.no_critical {
            self.critical.enabled = Some(false);
        }
        if let Some(preload) = cli.critical_preload.as_ref() {
            self.critical.preload = Some(preload.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            export,
            module,
            mount,
            critical,
            logging,
        } = raw;

        let export = build_export_settings(export)?;
        let module = build_module_settings(module)?;
        let mount = build_mount_settings(mount)?;
        let critical = build_critical_settings(critical)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            export,
            module,
            mount,
            critical,
            logging,
        })
    }
}

fn build_export_settings(export: RawExportSettings) -> Result<ExportSettings, LoadError> {
    let root = non_empty_path(export.root, "export.root")?
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_ROOT));
    let template = non_empty_path(export.template, "export.template")?
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE));

    let routes = export
        .routes
        .unwrap_or_else(|| vec![DEFAULT_ROUTE.to_string()]);
    let routes = RouteList::new(routes)
        .map_err(|err| LoadError::invalid("export.routes", err.to_string()))?;

    let not_found_route = export
        .not_found_route
        .filter(|route| !route.trim().is_empty())
        .map(|route| Route::parse(&route))
        .transpose()
        .map_err(|err| LoadError::invalid("export.not_found_route", err.to_string()))?;

    Ok(ExportSettings {
        root,
        template,
        routes,
        not_found_route,
    })
}

fn build_module_settings(module: RawModuleSettings) -> Result<ModuleSettings, LoadError> {
    let entry = non_empty_path(module.entry, "module.entry")?
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULE_ENTRY));

    let export = module
        .export
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| DEFAULT_MODULE_EXPORT.to_string());
    if !is_script_identifier(&export) {
        return Err(LoadError::invalid(
            "module.export",
            format!("`{export}` is not a valid export name"),
        ));
    }

    Ok(ModuleSettings { entry, export })
}

fn build_mount_settings(mount: RawMountSettings) -> Result<MountSettings, LoadError> {
    let element_id = mount
        .element_id
        .map(|id| id.trim().to_string())
        .unwrap_or_else(|| DEFAULT_MOUNT_ELEMENT_ID.to_string());
    if element_id.is_empty() {
        return Err(LoadError::invalid("mount.element_id", "must not be empty"));
    }
    if let Some(ch) = element_id
        .chars()
        .find(|ch| ch.is_whitespace() || matches!(ch, '"' | '\'' | '<' | '>' | '&'))
    {
        return Err(LoadError::invalid(
            "mount.element_id",
            format!("contains unsupported character `{}`", ch.escape_default()),
        ));
    }

    Ok(MountSettings {
        element_id,
        require_placeholder: mount.require_placeholder.unwrap_or(true),
    })
}

fn build_critical_settings(critical: RawCriticalSettings) -> Result<CriticalSettings, LoadError> {
    let preload = match critical.preload {
        Some(value) => PreloadStrategy::from_str(&value)
            .map_err(|reason| LoadError::invalid("critical.preload", reason))?,
        None => PreloadStrategy::default(),
    };
    let keyframes = match critical.keyframes {
        Some(value) => KeyframesStrategy::from_str(&value)
            .map_err(|reason| LoadError::invalid("critical.keyframes", reason))?,
        None => KeyframesStrategy::default(),
    };

    Ok(CriticalSettings {
        enabled: critical.enabled.unwrap_or(true),
        preload,
        noscript_fallback: critical.noscript_fallback.unwrap_or(true),
        inline_fonts: critical.inline_fonts.unwrap_or(false),
        preload_fonts: critical.preload_fonts.unwrap_or(true),
        keyframes,
        reduce_inline_styles: critical.reduce_inline_styles.unwrap_or(true),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExportSettings {
    root: Option<PathBuf>,
    template: Option<PathBuf>,
    routes: Option<Vec<String>>,
    not_found_route: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawModuleSettings {
    entry: Option<PathBuf>,
    export: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMountSettings {
    element_id: Option<String>,
    require_placeholder: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCriticalSettings {
    enabled: Option<bool>,
    preload: Option<String>,
    noscript_fallback: Option<bool>,
    inline_fonts: Option<bool>,
    preload_fonts: Option<bool>,
    keyframes: Option<String>,
    reduce_inline_styles: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_empty_path(value: Option<PathBuf>, key: &'static str) -> Result<Option<PathBuf>, LoadError> {
    match value {
        Some(path) if path.as_os_str().is_empty() => {
            Err(LoadError::invalid(key, "must not be empty"))
        }
        other => Ok(other),
    }
}

fn is_script_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || matches!(first, '_' | '$'))
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$'))
}

#[cfg(test)]
mod tests;
