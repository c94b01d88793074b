//! Critical-path CSS for exported documents.
//!
//! For every composed document the transformer inlines the stylesheet rules
//! whose selectors match the rendered markup and rewrites the original
//! `<link rel="stylesheet">` elements so they no longer block first paint.
//! It never fails the export: anything it cannot handle leaves the document
//! as it was.

mod reduce;
mod rewrite;
mod selector;
mod stylesheet;

use std::{
    collections::HashSet,
    fs, io,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use self::{
    reduce::Reducer,
    rewrite::{RewritePlan, collect_styles},
    selector::SelectorMatcher,
    stylesheet::{CssNode, parse_stylesheet},
};

pub const METRIC_RULES_INLINED: &str = "prerender_critical_rules_inlined_total";
pub const METRIC_STYLESHEETS_DEFERRED: &str = "prerender_stylesheets_deferred_total";
pub const METRIC_TRANSFORM_FALLBACK: &str = "prerender_transform_fallback_total";

/// How deferred stylesheets are loaded once critical rules are inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreloadStrategy {
    /// `media="print"` with an `onload` that restores the original media.
    #[default]
    Media,
    /// `rel="preload" as="style"` swapped to `stylesheet` on load.
    Swap,
    /// Move the link to the end of `<body>`.
    Body,
    /// Leave stylesheet links untouched; only inline.
    None,
}

impl PreloadStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            PreloadStrategy::Media => "media",
            PreloadStrategy::Swap => "swap",
            PreloadStrategy::Body => "body",
            PreloadStrategy::None => "none",
        }
    }
}

impl FromStr for PreloadStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "media" => Ok(Self::Media),
            "swap" => Ok(Self::Swap),
            "body" => Ok(Self::Body),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown preload strategy `{other}` (expected media, swap, body or none)"
            )),
        }
    }
}

/// Which `@keyframes` blocks travel with the inlined rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyframesStrategy {
    /// Only animations referenced by inlined rules.
    #[default]
    Critical,
    All,
    None,
}

impl FromStr for KeyframesStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown keyframes strategy `{other}` (expected critical, all or none)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CriticalOptions {
    /// Directory that root-relative stylesheet hrefs resolve against.
    pub base_path: PathBuf,
    pub preload: PreloadStrategy,
    pub noscript_fallback: bool,
    pub inline_fonts: bool,
    pub preload_fonts: bool,
    pub keyframes: KeyframesStrategy,
    pub reduce_inline_styles: bool,
}

impl CriticalOptions {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            preload: PreloadStrategy::default(),
            noscript_fallback: true,
            inline_fonts: false,
            preload_fonts: true,
            keyframes: KeyframesStrategy::default(),
            reduce_inline_styles: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("stylesheet `{href}` could not be read from {}", path.display())]
    StylesheetRead {
        href: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("document could not be rewritten: {message}")]
    Rewrite { message: String },
}

impl TransformError {
    pub(crate) fn rewrite(message: impl Into<String>) -> Self {
        Self::Rewrite {
            message: message.into(),
        }
    }
}

/// Result of a transform that changed the document.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub html: String,
    pub rules_inlined: usize,
    pub stylesheets_deferred: usize,
}

#[derive(Debug, Clone)]
pub struct CriticalCss {
    options: CriticalOptions,
}

impl CriticalCss {
    pub fn new(options: CriticalOptions) -> Self {
        Self { options }
    }

    /// Transform `html`, falling back to the untouched document on any error.
    pub fn process(&self, html: &str) -> String {
        match self.transform(html) {
            Ok(Some(transformed)) => {
                counter!(METRIC_RULES_INLINED).increment(transformed.rules_inlined as u64);
                counter!(METRIC_STYLESHEETS_DEFERRED)
                    .increment(transformed.stylesheets_deferred as u64);
                transformed.html
            }
            Ok(None) => html.to_string(),
            Err(err) => {
                counter!(METRIC_TRANSFORM_FALLBACK).increment(1);
                warn!(
                    target = "prerender::critical",
                    error = %err,
                    "Critical CSS skipped; document left unchanged"
                );
                html.to_string()
            }
        }
    }

    /// Transform `html`. `Ok(None)` means there was nothing to do.
    pub fn transform(&self, html: &str) -> Result<Option<Transformed>, TransformError> {
        let inventory = collect_styles(html)?;

        let mut seen = HashSet::new();
        let mut local_links = Vec::new();
        for href in &inventory.links {
            if !seen.insert(href.as_str()) {
                continue;
            }
            match resolve_local_href(&self.options.base_path, href) {
                Some(path) => local_links.push((href.clone(), path)),
                None => debug!(
                    target = "prerender::critical",
                    href = href.as_str(),
                    "Stylesheet is not a local file; leaving it alone"
                ),
            }
        }

        let reduce_inline = self.options.reduce_inline_styles && !inventory.inline_styles.is_empty();
        if local_links.is_empty() && !reduce_inline {
            return Ok(None);
        }

        let mut linked_sheets: Vec<Vec<CssNode>> = Vec::with_capacity(local_links.len());
        for (href, path) in &local_links {
            let source =
                fs::read_to_string(path).map_err(|source| TransformError::StylesheetRead {
                    href: href.clone(),
                    path: path.clone(),
                    source,
                })?;
            linked_sheets.push(parse_stylesheet(&source));
        }
        let inline_sheets: Vec<Vec<CssNode>> = if reduce_inline {
            inventory
                .inline_styles
                .iter()
                .map(|css| parse_stylesheet(css))
                .collect()
        } else {
            Vec::new()
        };

        let matcher = SelectorMatcher::new(html);
        let mut reducer = Reducer::new(&matcher, &self.options);
        for sheet in linked_sheets.iter().chain(inline_sheets.iter()) {
            reducer.observe(sheet);
        }

        let mut critical_css = String::new();
        let mut rules_inlined = 0;
        for sheet in &linked_sheets {
            let rendered = reducer.render(sheet);
            rules_inlined += rendered.rules;
            critical_css.push_str(&rendered.css);
        }

        let inline_replacements: Option<Vec<String>> = reduce_inline.then(|| {
            inline_sheets
                .iter()
                .map(|sheet| reducer.render_inline(sheet).css)
                .collect()
        });

        let font_preloads = if self.options.preload_fonts {
            reducer.font_preloads(linked_sheets.iter().chain(inline_sheets.iter()))
        } else {
            Vec::new()
        };

        let deferred: HashSet<&str> = local_links.iter().map(|(href, _)| href.as_str()).collect();
        let plan = RewritePlan {
            deferred: &deferred,
            critical_css: &critical_css,
            font_preloads: &font_preloads,
            inline_replacements: inline_replacements.as_deref(),
            preload: self.options.preload,
            noscript_fallback: self.options.noscript_fallback,
        };
        let rewritten = rewrite::apply(html, &plan)?;

        debug!(
            target = "prerender::critical",
            stylesheets = local_links.len(),
            rules_inlined,
            critical_bytes = critical_css.len(),
            "Critical CSS inlined"
        );

        Ok(Some(Transformed {
            html: rewritten.html,
            rules_inlined,
            stylesheets_deferred: rewritten.deferred_links,
        }))
    }
}

/// Map a stylesheet href onto a file under `base`. Absolute URLs and paths
/// escaping `base` are not local.
fn resolve_local_href(base: &Path, href: &str) -> Option<PathBuf> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("//") || Url::parse(href).is_ok() {
        return None;
    }

    let path_part = href.split(['?', '#']).next().unwrap_or_default();
    let relative = Path::new(path_part.trim_start_matches('/'));
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }

    Some(base.join(relative))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_css(dir: &TempDir, name: &str, css: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("css dir");
        }
        fs::write(path, css).expect("css file");
    }

    fn document(body: &str) -> String {
        format!(
            "<html><head><link rel=\"stylesheet\" href=\"/assets/app.css\"></head><body>{body}</body></html>"
        )
    }

    #[test]
    fn document_without_stylesheets_is_unchanged() {
        let dir = TempDir::new().expect("temp dir");
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));
        let html = "<html><head><title>x</title></head><body><h1>Home</h1></body></html>";

        assert!(critical.transform(html).expect("transform").is_none());
        assert_eq!(critical.process(html), html);
    }

    #[test]
    fn inlines_matching_rule_and_defers_link() {
        let dir = TempDir::new().expect("temp dir");
        write_css(&dir, "assets/app.css", ".hero { color: red }");
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));

        let out = critical
            .transform(&document("<h1 class=\"hero\">Hi</h1>"))
            .expect("transform")
            .expect("changed");

        assert!(out.html.contains(
            "<head><style>.hero{color: red}</style><link rel=\"stylesheet\" href=\"/assets/app.css\""
        ));
        assert!(out.html.contains("media=\"print\""));
        assert!(out.html.contains("onload=\"this.media='all'\""));
        assert!(
            out.html
                .contains("<noscript><link rel=\"stylesheet\" href=\"/assets/app.css\"></noscript>")
        );
        assert_eq!(out.rules_inlined, 1);
        assert_eq!(out.stylesheets_deferred, 1);
    }

    #[test]
    fn unused_rules_and_fonts_stay_out() {
        let dir = TempDir::new().expect("temp dir");
        write_css(
            &dir,
            "assets/app.css",
            "@font-face{font-family:\"Inter\";src:url(/fonts/inter.woff2) format(\"woff2\")}\
             .hero{font-family:Inter,sans-serif}\
             .footer{color:gray}\
             @media (min-width:640px){.footer{padding:0}.hero{padding:1rem}}",
        );
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));

        let out = critical
            .transform(&document("<h1 class=\"hero\">Hi</h1>"))
            .expect("transform")
            .expect("changed");

        assert!(out.html.contains(
            "<style>.hero{font-family:Inter,sans-serif}@media (min-width:640px){.hero{padding:1rem}}</style>"
        ));
        assert!(!out.html.contains(".footer{"));
        assert!(!out.html.contains("@font-face"));
        assert!(out.html.contains(
            "<link rel=\"preload\" href=\"/fonts/inter.woff2\" as=\"font\" crossorigin>"
        ));
    }

    #[test]
    fn swap_strategy_rewrites_rel() {
        let dir = TempDir::new().expect("temp dir");
        write_css(&dir, "assets/app.css", "h1{margin:0}");
        let mut options = CriticalOptions::new(dir.path());
        options.preload = PreloadStrategy::Swap;
        options.noscript_fallback = false;
        let critical = CriticalCss::new(options);

        let out = critical
            .transform(&document("<h1>Hi</h1>"))
            .expect("transform")
            .expect("changed");

        assert!(out.html.contains("rel=\"preload\""));
        assert!(out.html.contains("as=\"style\""));
        assert!(out.html.contains("onload=\"this.rel='stylesheet'\""));
        assert!(!out.html.contains("<noscript>"));
    }

    #[test]
    fn body_strategy_moves_link_to_end_of_body() {
        let dir = TempDir::new().expect("temp dir");
        write_css(&dir, "assets/app.css", "h1{margin:0}");
        let mut options = CriticalOptions::new(dir.path());
        options.preload = PreloadStrategy::Body;
        let critical = CriticalCss::new(options);

        let out = critical
            .transform(&document("<h1>Hi</h1>"))
            .expect("transform")
            .expect("changed");

        assert!(
            out.html
                .contains("<h1>Hi</h1><link rel=\"stylesheet\" href=\"/assets/app.css\"></body>")
        );
        assert!(!out.html.contains("<head><link"));
    }

    #[test]
    fn external_stylesheets_are_left_alone() {
        let dir = TempDir::new().expect("temp dir");
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));
        let html = "<html><head><link rel=\"stylesheet\" href=\"https://fonts.example/css\"></head><body></body></html>";

        assert_eq!(critical.process(html), html);
    }

    #[test]
    fn missing_stylesheet_falls_back_to_original_document() {
        let dir = TempDir::new().expect("temp dir");
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));
        let html = document("<h1>Hi</h1>");

        assert!(matches!(
            critical.transform(&html),
            Err(TransformError::StylesheetRead { .. })
        ));
        assert_eq!(critical.process(&html), html);
    }

    #[test]
    fn keyframes_follow_animation_usage() {
        let dir = TempDir::new().expect("temp dir");
        write_css(
            &dir,
            "assets/app.css",
            "@keyframes spin{to{transform:rotate(1turn)}}@keyframes fade{to{opacity:0}}.spinner{animation:spin 1s linear infinite}",
        );
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));

        let out = critical
            .transform(&document("<div class=\"spinner\"></div>"))
            .expect("transform")
            .expect("changed");

        assert!(out.html.contains("@keyframes spin{to{transform:rotate(1turn)}}"));
        assert!(!out.html.contains("@keyframes fade"));
    }

    #[test]
    fn inline_styles_are_pruned() {
        let dir = TempDir::new().expect("temp dir");
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));
        let html = "<html><head><style>.used{color:red}.unused{color:blue}</style></head><body><p class=\"used\">x</p></body></html>";

        let out = critical.process(html);
        assert!(out.contains("<style>.used{color:red}</style>"));
        assert!(!out.contains(".unused"));
    }

    #[test]
    fn inline_style_pruning_keeps_imports_and_page_rules() {
        let dir = TempDir::new().expect("temp dir");
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));
        let html = "<html><head><style>@import url(/theme.css);@page{margin:1cm}.used{color:red}.unused{color:blue}</style></head>\
                    <body><p class=\"used\">x</p></body></html>";

        let out = critical.process(html);
        assert!(out.contains("<style>@import url(/theme.css);@page{margin:1cm}.used{color:red}</style>"));
    }

    #[test]
    fn critical_rules_stay_below_later_author_styles() {
        let dir = TempDir::new().expect("temp dir");
        write_css(&dir, "assets/app.css", ".hero{color:red}");
        let critical = CriticalCss::new(CriticalOptions::new(dir.path()));
        let html = "<html><head><link rel=\"stylesheet\" href=\"/assets/app.css\"><style>.hero{color:blue}</style></head>\
                    <body><h1 class=\"hero\">Hi</h1></body></html>";

        let out = critical.process(html);
        let inlined = out.find("<style>.hero{color:red}</style>").expect("inlined rules");
        let author = out.find("<style>.hero{color:blue}</style>").expect("author rules");
        assert!(inlined < author, "{out}");
    }

    #[test]
    fn href_resolution_stays_under_base() {
        let base = Path::new("/srv/dist");
        assert_eq!(
            resolve_local_href(base, "/assets/app.css?v=3"),
            Some(PathBuf::from("/srv/dist/assets/app.css"))
        );
        assert_eq!(
            resolve_local_href(base, "assets/app.css"),
            Some(PathBuf::from("/srv/dist/assets/app.css"))
        );
        assert_eq!(resolve_local_href(base, "/../secret.css"), None);
        assert_eq!(resolve_local_href(base, "//cdn.example/app.css"), None);
        assert_eq!(resolve_local_href(base, "https://cdn.example/app.css"), None);
    }

    #[test]
    fn strategies_parse_from_configuration_strings() {
        assert_eq!("Swap".parse::<PreloadStrategy>(), Ok(PreloadStrategy::Swap));
        assert!("eager".parse::<PreloadStrategy>().is_err());
        assert_eq!("all".parse::<KeyframesStrategy>(), Ok(KeyframesStrategy::All));
    }
}
