use std::{cell::RefCell, collections::HashMap};

use scraper::{Html, Selector};
use tracing::debug;

use super::stylesheet::split_top_level;

/// Answers "does this selector match anything in the document?" for one document.
pub(crate) struct SelectorMatcher {
    document: Html,
    cache: RefCell<HashMap<String, bool>>,
}

impl SelectorMatcher {
    pub(crate) fn new(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Subset of a comma-separated selector list that matches the document.
    pub(crate) fn matching_selectors<'s>(&self, selector_list: &'s str) -> Vec<&'s str> {
        split_top_level(selector_list, b',')
            .into_iter()
            .map(str::trim)
            .filter(|selector| !selector.is_empty() && self.matches(selector))
            .collect()
    }

    pub(crate) fn matches(&self, selector: &str) -> bool {
        if let Some(hit) = self.cache.borrow().get(selector) {
            return *hit;
        }

        let result = self.evaluate(selector);
        self.cache.borrow_mut().insert(selector.to_string(), result);
        result
    }

    fn evaluate(&self, selector: &str) -> bool {
        let stripped = strip_dynamic_pseudos(selector);
        let candidate = stripped.trim();
        if candidate.is_empty() || candidate == "*" {
            return true;
        }

        match Selector::parse(candidate) {
            Ok(parsed) => self.document.select(&parsed).next().is_some(),
            Err(err) => {
                // Keep what we cannot evaluate.
                debug!(
                    target = "prerender::critical",
                    selector = candidate,
                    error = %err,
                    "Selector not understood; keeping rule"
                );
                true
            }
        }
    }
}

/// Remove pseudo-classes and pseudo-elements without arguments (`:hover`,
/// `::before`, `:root`), which depend on state a static document does not
/// have. Functional pseudo-classes such as `:not(...)` are kept. Escaped
/// colons (`.md\:flex`) and attribute values are left untouched.
pub(crate) fn strip_dynamic_pseudos(selector: &str) -> String {
    let chars: Vec<char> = selector.chars().collect();
    let mut out = String::with_capacity(selector.len());
    let mut idx = 0;
    let mut bracket_depth = 0usize;
    let mut quote: Option<char> = None;

    while idx < chars.len() {
        let ch = chars[idx];

        if let Some(open) = quote {
            out.push(ch);
            if ch == '\\' {
                if let Some(next) = chars.get(idx + 1) {
                    out.push(*next);
                    idx += 1;
                }
            } else if ch == open {
                quote = None;
            }
            idx += 1;
            continue;
        }

        match ch {
            '\\' => {
                out.push(ch);
                if let Some(next) = chars.get(idx + 1) {
                    out.push(*next);
                    idx += 1;
                }
            }
            '"' | '\'' => {
                quote = Some(ch);
                out.push(ch);
            }
            '[' => {
                bracket_depth += 1;
                out.push(ch);
            }
            ']' => {
                bracket_depth = bracket_depth.saturating_sub(1);
                out.push(ch);
            }
            ':' if bracket_depth == 0 => {
                let mut end = idx + 1;
                if chars.get(end) == Some(&':') {
                    end += 1;
                }
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '-' || chars[end] == '_')
                {
                    end += 1;
                }

                if chars.get(end) == Some(&'(') {
                    out.extend(&chars[idx..end]);
                }
                idx = end;
                continue;
            }
            _ => out.push(ch),
        }
        idx += 1;
    }

    out
}
