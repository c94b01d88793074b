use std::collections::BTreeSet;

use super::{
    CriticalOptions, KeyframesStrategy,
    selector::SelectorMatcher,
    stylesheet::{CssNode, split_top_level},
};

const ANIMATION_KEYWORDS: &[&str] = &[
    "none",
    "infinite",
    "normal",
    "reverse",
    "alternate",
    "alternate-reverse",
    "forwards",
    "backwards",
    "both",
    "running",
    "paused",
    "linear",
    "ease",
    "ease-in",
    "ease-out",
    "ease-in-out",
    "step-start",
    "step-end",
    "initial",
    "inherit",
    "unset",
    "revert",
];

/// Whether rules outside the selector model survive reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retain {
    /// Inlined critical CSS: statements and unhandled at-rules stay in the
    /// deferred sheet.
    MatchedOnly,
    /// A document's own `<style>`: nothing else loads these rules later.
    Unhandled,
}

pub(crate) struct Rendered {
    pub(crate) css: String,
    pub(crate) rules: usize,
}

/// Filters parsed stylesheets down to the rules a document needs.
///
/// `observe` must see every sheet before `render` is called so that keyframes
/// and font faces referenced from any kept rule are known up front.
pub(crate) struct Reducer<'a> {
    matcher: &'a SelectorMatcher,
    options: &'a CriticalOptions,
    animations: BTreeSet<String>,
    font_families: BTreeSet<String>,
}

impl<'a> Reducer<'a> {
    pub(crate) fn new(matcher: &'a SelectorMatcher, options: &'a CriticalOptions) -> Self {
        Self {
            matcher,
            options,
            animations: BTreeSet::new(),
            font_families: BTreeSet::new(),
        }
    }

    pub(crate) fn observe(&mut self, nodes: &[CssNode]) {
        for node in nodes {
            match node {
                CssNode::Style {
                    selectors,
                    declarations,
                } => {
                    if !self.matcher.matching_selectors(selectors).is_empty() {
                        self.record_references(declarations);
                    }
                }
                CssNode::Group { rules, .. } => self.observe(rules),
                CssNode::AtBlock { .. } | CssNode::Statement { .. } => {}
            }
        }
    }

    pub(crate) fn render(&self, nodes: &[CssNode]) -> Rendered {
        let mut css = String::new();
        let rules = self.render_into(nodes, Retain::MatchedOnly, &mut css);
        Rendered { css, rules }
    }

    /// Prune an inline `<style>` in place. Only unmatched style rules and
    /// strategy-controlled font faces and keyframes are removed.
    pub(crate) fn render_inline(&self, nodes: &[CssNode]) -> Rendered {
        let mut css = String::new();
        let rules = self.render_into(nodes, Retain::Unhandled, &mut css);
        Rendered { css, rules }
    }

    /// Preload hrefs for font faces used by kept rules, in stylesheet order.
    pub(crate) fn font_preloads<'n, I>(&self, sheets: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'n Vec<CssNode>>,
    {
        let mut hrefs = Vec::new();
        for sheet in sheets {
            self.collect_font_preloads(sheet, &mut hrefs);
        }
        hrefs
    }

    fn render_into(&self, nodes: &[CssNode], retain: Retain, out: &mut String) -> usize {
        let mut kept = 0;

        for node in nodes {
            match node {
                CssNode::Style {
                    selectors,
                    declarations,
                } => {
                    let matching = self.matcher.matching_selectors(selectors);
                    if matching.is_empty() {
                        continue;
                    }
                    out.push_str(&matching.join(","));
                    out.push('{');
                    out.push_str(declarations);
                    out.push('}');
                    kept += 1;
                }
                CssNode::Group { prelude, rules } => {
                    let mut inner = String::new();
                    let nested = self.render_into(rules, retain, &mut inner);
                    if nested > 0 {
                        out.push_str(prelude);
                        out.push('{');
                        out.push_str(&inner);
                        out.push('}');
                        kept += nested;
                    }
                }
                CssNode::AtBlock {
                    name,
                    prelude,
                    body,
                } => {
                    if self.keep_at_block(name, prelude, body, retain) {
                        out.push_str(prelude);
                        out.push('{');
                        out.push_str(body);
                        out.push('}');
                        kept += 1;
                    }
                }
                CssNode::Statement { text, .. } => {
                    if retain == Retain::Unhandled {
                        out.push_str(text);
                        out.push(';');
                        kept += 1;
                    }
                }
            }
        }

        kept
    }

    fn keep_at_block(&self, name: &str, prelude: &str, body: &str, retain: Retain) -> bool {
        if name == "font-face" {
            return match retain {
                Retain::MatchedOnly => self.options.inline_fonts,
                Retain::Unhandled => self.options.inline_fonts || self.uses_font_face(body),
            };
        }

        if name.ends_with("keyframes") {
            return match self.options.keyframes {
                KeyframesStrategy::All => true,
                KeyframesStrategy::None => false,
                KeyframesStrategy::Critical => keyframes_name(prelude)
                    .is_some_and(|animation| self.animations.contains(&animation)),
            };
        }

        retain == Retain::Unhandled
    }

    fn uses_font_face(&self, body: &str) -> bool {
        declarations_of(body)
            .find(|(property, _)| property == "font-family")
            .is_some_and(|(_, family)| self.font_families.contains(&normalize_family(family)))
    }

    fn record_references(&mut self, declarations: &str) {
        for (property, value) in declarations_of(declarations) {
            match property.as_str() {
                "animation-name" => {
                    for name in value.split(',') {
                        let name = unquote(name.trim());
                        if !name.is_empty() && name != "none" {
                            self.animations.insert(name.to_string());
                        }
                    }
                }
                "animation" | "-webkit-animation" => {
                    for layer in split_top_level(value, b',') {
                        if let Some(name) = layer
                            .split_whitespace()
                            .map(unquote)
                            .find(|token| is_animation_name(token))
                        {
                            self.animations.insert(name.to_string());
                        }
                    }
                }
                "font-family" => {
                    for family in value.split(',') {
                        let family = normalize_family(family);
                        if !family.is_empty() {
                            self.font_families.insert(family);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_font_preloads(&self, nodes: &[CssNode], hrefs: &mut Vec<String>) {
        for node in nodes {
            match node {
                CssNode::Group { rules, .. } => self.collect_font_preloads(rules, hrefs),
                CssNode::AtBlock { name, body, .. } if name == "font-face" => {
                    let mut family = None;
                    let mut source = None;
                    for (property, value) in declarations_of(body) {
                        match property.as_str() {
                            "font-family" => family = Some(normalize_family(value)),
                            "src" => source = first_url(value),
                            _ => {}
                        }
                    }

                    if let (Some(family), Some(href)) = (family, source)
                        && self.font_families.contains(&family)
                        && !href.starts_with("data:")
                        && !hrefs.contains(&href)
                    {
                        hrefs.push(href);
                    }
                }
                _ => {}
            }
        }
    }
}

/// `(lowercase property, value)` pairs, with `!important` removed.
fn declarations_of(block: &str) -> impl Iterator<Item = (String, &str)> {
    split_top_level(block, b';').into_iter().filter_map(|declaration| {
        let (property, value) = declaration.split_once(':')?;
        let value = value.trim();
        let value = value
            .strip_suffix("!important")
            .map(str::trim_end)
            .unwrap_or(value);
        Some((property.trim().to_ascii_lowercase(), value))
    })
}

fn is_animation_name(token: &str) -> bool {
    let Some(first) = token.chars().next() else {
        return false;
    };
    if first.is_ascii_digit() || first == '.' || token.contains('(') {
        return false;
    }
    if first == '-' && token.chars().nth(1).is_some_and(|ch| ch.is_ascii_digit()) {
        return false;
    }
    !ANIMATION_KEYWORDS.contains(&token.to_ascii_lowercase().as_str())
}

fn keyframes_name(prelude: &str) -> Option<String> {
    let (_, name) = prelude.split_once(char::is_whitespace)?;
    let name = unquote(name.trim());
    (!name.is_empty()).then(|| name.to_string())
}

fn normalize_family(raw: &str) -> String {
    unquote(raw.trim()).trim().to_ascii_lowercase()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
        })
        .unwrap_or(value)
}

fn first_url(value: &str) -> Option<String> {
    let start = value.find("url(")? + 4;
    let rest = &value[start..];
    let end = rest.find(')')?;
    let href = unquote(rest[..end].trim()).trim();
    (!href.is_empty()).then(|| href.to_string())
}
