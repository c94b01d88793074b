//! Module host backed by an embedded ECMAScript engine.
//!
//! `boa_engine::Context` is `!Send`, so each acquired host owns one OS thread
//! that holds the context and serves commands from a bounded channel. Replies
//! come back over `tokio::sync::oneshot` so the async driver never blocks on
//! the engine.
//!
//! ES module bundles (`export function render`) are linked and evaluated
//! with their relative imports resolved next to the entry file. Anything
//! that parses as a classic script is run as one instead, where bundles that
//! assign `module.exports` (CommonJS) and bundles that declare the export as
//! a global function are both accepted.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
    sync::mpsc::{self, Receiver, SyncSender},
    thread::{self, JoinHandle},
};

use async_trait::async_trait;
use boa_engine::{
    Context, JsError, JsString, JsValue, Module, Script, Source,
    builtins::promise::PromiseState, module::SimpleModuleLoader,
};
use tokio::{fs, sync::oneshot, task};
use tracing::{debug, warn};

use crate::{
    application::host::{
        HostProvider, ModuleHost, ModuleLoadError, ModuleSpec, RenderFailure, RenderFn,
    },
    domain::route::Route,
};

const COMMAND_CAPACITY: usize = 16;
const THREAD_NAME: &str = "prerender-script-host";
const RENDER_BINDING: &str = "__prerenderRender";
const MODULE_PRELUDE: &str = "var module = { exports: {} }; var exports = module.exports;";

enum LoadFailure {
    Evaluation(String),
    MissingExport,
}

enum HostCommand {
    Load {
        entry: PathBuf,
        source: String,
        export: String,
        reply: oneshot::Sender<Result<(), LoadFailure>>,
    },
    Render {
        route: String,
        reply: oneshot::Sender<Result<String, String>>,
    },
    Shutdown,
}

/// Starts a fresh script host per export run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptHostProvider;

#[async_trait]
impl HostProvider for ScriptHostProvider {
    async fn acquire(&self) -> Result<Box<dyn ModuleHost>, ModuleLoadError> {
        Ok(Box::new(ScriptHost::start()?))
    }
}

pub struct ScriptHost {
    commands: Option<SyncSender<HostCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl ScriptHost {
    pub fn start() -> Result<Self, ModuleLoadError> {
        let (commands, receiver) = mpsc::sync_channel(COMMAND_CAPACITY);
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || engine_thread_main(receiver))
            .map_err(|err| ModuleLoadError::startup(format!("failed to spawn engine thread: {err}")))?;

        debug!(target = "prerender::script_host", "Script host started");
        Ok(Self {
            commands: Some(commands),
            thread: Some(thread),
        })
    }
}

#[async_trait]
impl ModuleHost for ScriptHost {
    async fn load(&mut self, module: &ModuleSpec) -> Result<Box<dyn RenderFn>, ModuleLoadError> {
        let commands = self
            .commands
            .clone()
            .ok_or(ModuleLoadError::HostUnavailable)?;

        let unresolved = |source| ModuleLoadError::Unresolved {
            path: module.entry.clone(),
            source,
        };
        let entry = fs::canonicalize(&module.entry).await.map_err(unresolved)?;
        let source = fs::read_to_string(&entry).await.map_err(unresolved)?;

        let (reply, response) = oneshot::channel();
        commands
            .send(HostCommand::Load {
                entry,
                source,
                export: module.export.clone(),
                reply,
            })
            .map_err(|_| ModuleLoadError::HostUnavailable)?;

        match response.await.map_err(|_| ModuleLoadError::HostUnavailable)? {
            Ok(()) => {
                debug!(
                    target = "prerender::script_host",
                    entry = %module.entry.display(),
                    export = module.export.as_str(),
                    "Render module loaded"
                );
                Ok(Box::new(ScriptRender { commands }))
            }
            Err(LoadFailure::Evaluation(message)) => Err(ModuleLoadError::Evaluation {
                path: module.entry.clone(),
                message,
            }),
            Err(LoadFailure::MissingExport) => Err(ModuleLoadError::MissingExport {
                path: module.entry.clone(),
                export: module.export.clone(),
            }),
        }
    }

    async fn release(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(HostCommand::Shutdown);
        }

        let Some(thread) = self.thread.take() else {
            return;
        };
        match task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => debug!(target = "prerender::script_host", "Script host released"),
            Ok(Err(_)) => warn!(
                target = "prerender::script_host",
                "Script engine thread panicked before release"
            ),
            Err(err) => warn!(
                target = "prerender::script_host",
                error = %err,
                "Script engine thread could not be joined"
            ),
        }
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(HostCommand::Shutdown);
        }
    }
}

struct ScriptRender {
    commands: SyncSender<HostCommand>,
}

#[async_trait]
impl RenderFn for ScriptRender {
    async fn render(&self, route: &Route) -> Result<String, RenderFailure> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HostCommand::Render {
                route: route.as_str().to_string(),
                reply,
            })
            .map_err(|_| RenderFailure::HostUnavailable)?;

        response
            .await
            .map_err(|_| RenderFailure::HostUnavailable)?
            .map_err(RenderFailure::Threw)
    }
}

fn engine_thread_main(commands: Receiver<HostCommand>) {
    let mut context = Context::default();

    while let Ok(command) = commands.recv() {
        match command {
            HostCommand::Load {
                entry,
                source,
                export,
                reply,
            } => {
                let _ = reply.send(load_module(&entry, &source, &export, &mut context));
            }
            HostCommand::Render { route, reply } => {
                let _ = reply.send(render_route(&route, &mut context));
            }
            HostCommand::Shutdown => break,
        }
    }
}

/// Evaluate the bundle in a fresh context whose module loader resolves
/// relative imports against the entry's directory.
fn load_module(
    entry: &Path,
    source: &str,
    export: &str,
    context: &mut Context,
) -> Result<(), LoadFailure> {
    let root = entry.parent().unwrap_or_else(|| Path::new("."));
    let loader = SimpleModuleLoader::new(root)
        .map(Rc::new)
        .map_err(|err| LoadFailure::Evaluation(err.to_string()))?;
    *context = Context::builder()
        .module_loader(Rc::clone(&loader))
        .build()
        .map_err(|err| LoadFailure::Evaluation(err.to_string()))?;

    let render = match parse_entry(entry, source, context).map_err(LoadFailure::Evaluation)? {
        Entry::Script(script) => load_script(script, export, context)?,
        Entry::Module(module) => {
            loader.insert(entry.to_path_buf(), module.clone());
            load_es_module(&module, export, context)?
        }
    };

    context
        .global_object()
        .set(JsString::from(RENDER_BINDING), render, false, context)
        .map_err(|err| LoadFailure::Evaluation(js_error_to_string(&err, context)))?;
    Ok(())
}

enum Entry {
    Script(Script),
    Module(Module),
}

/// `.mjs` entries are always modules. Otherwise a source that fails to parse
/// as a script but parses as a module is a module, and the script error wins
/// when neither parses.
fn parse_entry(entry: &Path, source: &str, context: &mut Context) -> Result<Entry, String> {
    let parse_module = |context: &mut Context| {
        Module::parse(Source::from_bytes(source).with_path(entry), None, context)
    };

    if entry.extension().is_some_and(|ext| ext == "mjs") {
        return parse_module(context)
            .map(Entry::Module)
            .map_err(|err| js_error_to_string(&err, context));
    }

    match Script::parse(Source::from_bytes(source).with_path(entry), None, context) {
        Ok(script) => Ok(Entry::Script(script)),
        Err(script_err) => match parse_module(context) {
            Ok(module) => Ok(Entry::Module(module)),
            Err(_) => Err(js_error_to_string(&script_err, context)),
        },
    }
}

fn load_script(script: Script, export: &str, context: &mut Context) -> Result<JsValue, LoadFailure> {
    eval(MODULE_PRELUDE, context).map_err(LoadFailure::Evaluation)?;
    script
        .evaluate(context)
        .map_err(|err| LoadFailure::Evaluation(js_error_to_string(&err, context)))?;

    let name = js_string_literal(export);
    let lookup = format!(
        r#"(function() {{
            var name = {name};
            var found = module.exports && module.exports[name];
            if (typeof found !== 'function' && name === 'default') {{ found = module.exports; }}
            if (typeof found !== 'function') {{ found = globalThis[name]; }}
            return found;
        }})()"#
    );
    let found = eval(&lookup, context).map_err(LoadFailure::Evaluation)?;
    if found.is_callable() {
        Ok(found)
    } else {
        Err(LoadFailure::MissingExport)
    }
}

fn load_es_module(module: &Module, export: &str, context: &mut Context) -> Result<JsValue, LoadFailure> {
    let evaluated = module.load_link_evaluate(context);
    context
        .run_jobs()
        .map_err(|err| LoadFailure::Evaluation(js_error_to_string(&err, context)))?;

    match evaluated.state() {
        PromiseState::Fulfilled(_) => {}
        PromiseState::Rejected(reason) => {
            let err = JsError::from_opaque(reason);
            return Err(LoadFailure::Evaluation(js_error_to_string(&err, context)));
        }
        PromiseState::Pending => {
            return Err(LoadFailure::Evaluation(
                "module evaluation did not settle".to_string(),
            ));
        }
    }

    let found = module
        .namespace(context)
        .get(JsString::from(export), context)
        .map_err(|err| LoadFailure::Evaluation(js_error_to_string(&err, context)))?;
    if found.is_callable() {
        Ok(found)
    } else {
        Err(LoadFailure::MissingExport)
    }
}

fn render_route(route: &str, context: &mut Context) -> Result<String, String> {
    let call = format!("String({RENDER_BINDING}({}))", js_string_literal(route));
    let value = eval(&call, context)?;
    value
        .to_string(context)
        .map(|s| s.to_std_string_escaped())
        .map_err(|err| js_error_to_string(&err, context))
}

fn eval(code: &str, context: &mut Context) -> Result<JsValue, String> {
    context
        .eval(Source::from_bytes(code))
        .map_err(|err| js_error_to_string(&err, context))
}

fn js_error_to_string(error: &JsError, context: &mut Context) -> String {
    error
        .to_opaque(context)
        .to_string(context)
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|_| "unknown script error".to_string())
}

/// JSON string literals are valid ECMAScript string literals.
fn js_string_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
