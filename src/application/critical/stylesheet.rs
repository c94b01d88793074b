//! A small, forgiving stylesheet splitter.
//!
//! Only rule boundaries are recognised: selector preludes, declaration blocks
//! and at-rules. Declarations stay opaque text. Malformed trailing input is
//! dropped rather than reported, mirroring how browsers recover.

/// Grouping at-rules whose bodies contain further rules.
const GROUPING_AT_RULES: &[&str] = &[
    "media",
    "supports",
    "layer",
    "container",
    "document",
    "-moz-document",
    "scope",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CssNode {
    /// `selectors { declarations }`
    Style {
        selectors: String,
        declarations: String,
    },
    /// `@media ... { rules }` and friends.
    Group {
        prelude: String,
        rules: Vec<CssNode>,
    },
    /// `@font-face { ... }`, `@keyframes name { ... }`, `@page { ... }`.
    AtBlock {
        name: String,
        prelude: String,
        body: String,
    },
    /// `@import ...;`, `@charset ...;`
    Statement { name: String, text: String },
}

#[cfg(test)]
impl CssNode {
    fn at_name(&self) -> Option<&str> {
        match self {
            CssNode::AtBlock { name, .. } | CssNode::Statement { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub(crate) fn parse_stylesheet(source: &str) -> Vec<CssNode> {
    let mut parser = Parser {
        src: source,
        pos: 0,
    };
    parser.rules()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

enum Terminator {
    Block,
    Semicolon,
    Eof,
}

impl<'a> Parser<'a> {
    fn rules(&mut self) -> Vec<CssNode> {
        let mut nodes = Vec::new();

        loop {
            self.skip_trivia();
            if self.pos >= self.src.len() {
                break;
            }

            let start = self.pos;
            let (end, terminator) = self.scan_prelude();
            let prelude = collapse_whitespace(&strip_comments(&self.src[start..end]));

            match terminator {
                Terminator::Eof => break,
                Terminator::Semicolon => {
                    self.pos = end + 1;
                    if let Some(name) = at_keyword(&prelude) {
                        nodes.push(CssNode::Statement {
                            name,
                            text: prelude,
                        });
                    }
                }
                Terminator::Block => {
                    let body_start = end + 1;
                    let Some(close) = self.matching_brace(body_start) else {
                        break;
                    };
                    let body = &self.src[body_start..close];
                    self.pos = close + 1;

                    match at_keyword(&prelude) {
                        Some(name) if GROUPING_AT_RULES.contains(&name.as_str()) => {
                            nodes.push(CssNode::Group {
                                prelude,
                                rules: parse_stylesheet(body),
                            });
                        }
                        Some(name) => nodes.push(CssNode::AtBlock {
                            name,
                            prelude,
                            body: strip_comments(body).trim().to_string(),
                        }),
                        None if prelude.is_empty() => {}
                        None => nodes.push(CssNode::Style {
                            selectors: prelude,
                            declarations: strip_comments(body).trim().to_string(),
                        }),
                    }
                }
            }
        }

        nodes
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = &self.src[self.pos..];
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("/*") {
                self.pos = match trimmed[2..].find("*/") {
                    Some(idx) => self.pos + 2 + idx + 2,
                    None => self.src.len(),
                };
            } else if trimmed.starts_with("<!--") {
                self.pos += 4;
            } else if trimmed.starts_with("-->") {
                self.pos += 3;
            } else {
                return;
            }
        }
    }

    /// Find the `{` or `;` ending the prelude that starts at `self.pos`.
    fn scan_prelude(&self) -> (usize, Terminator) {
        let bytes = self.src.as_bytes();
        let mut depth = 0usize;
        let mut idx = self.pos;

        while idx < bytes.len() {
            match bytes[idx] {
                b'\\' => idx += 1,
                b'"' | b'\'' => idx = skip_string(bytes, idx),
                b'/' if bytes.get(idx + 1) == Some(&b'*') => idx = skip_comment(bytes, idx),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b'{' if depth == 0 => return (idx, Terminator::Block),
                b';' if depth == 0 => return (idx, Terminator::Semicolon),
                _ => {}
            }
            idx += 1;
        }

        (bytes.len(), Terminator::Eof)
    }

    /// Index of the `}` closing a block whose contents start at `from`.
    fn matching_brace(&self, from: usize) -> Option<usize> {
        let bytes = self.src.as_bytes();
        let mut depth = 1usize;
        let mut idx = from;

        while idx < bytes.len() {
            match bytes[idx] {
                b'\\' => idx += 1,
                b'"' | b'\'' => idx = skip_string(bytes, idx),
                b'/' if bytes.get(idx + 1) == Some(&b'*') => idx = skip_comment(bytes, idx),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                _ => {}
            }
            idx += 1;
        }

        None
    }
}

/// Returns the index of the closing quote (or the last byte when unterminated).
fn skip_string(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut idx = open + 1;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 1,
            b'\n' => return idx,
            byte if byte == quote => return idx,
            _ => {}
        }
        idx += 1;
    }
    bytes.len().saturating_sub(1)
}

/// Returns the index of the `/` closing the comment (or the last byte when unterminated).
fn skip_comment(bytes: &[u8], open: usize) -> usize {
    let mut idx = open + 2;
    while idx + 1 < bytes.len() {
        if bytes[idx] == b'*' && bytes[idx + 1] == b'/' {
            return idx + 1;
        }
        idx += 1;
    }
    bytes.len().saturating_sub(1)
}

fn at_keyword(prelude: &str) -> Option<String> {
    let rest = prelude.strip_prefix('@')?;
    let name: String = rest
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect();
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

pub(crate) fn strip_comments(text: &str) -> String {
    if !text.contains("/*") {
        return text.to_string();
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied_from = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 1,
            b'"' | b'\'' => idx = skip_string(bytes, idx),
            b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                out.push_str(&text[copied_from..idx]);
                idx = skip_comment(bytes, idx);
                copied_from = (idx + 1).min(bytes.len());
            }
            _ => {}
        }
        idx += 1;
    }

    if copied_from < text.len() {
        out.push_str(&text[copied_from..]);
    }
    out
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` on `separator` bytes that are outside parentheses, brackets and strings.
pub(crate) fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 1,
            b'"' | b'\'' => idx = skip_string(bytes, idx),
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            byte if byte == separator && depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
        idx += 1;
    }

    parts.push(&text[start.min(text.len())..]);
    parts
}
