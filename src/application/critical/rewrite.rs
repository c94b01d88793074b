use std::{cell::RefCell, collections::HashSet, rc::Rc};

use lol_html::{RewriteStrSettings, element, end, html_content::ContentType, rewrite_str, text};

use super::{PreloadStrategy, TransformError};

/// Stylesheet references and inline `<style>` contents, in document order.
#[derive(Debug, Default)]
pub(crate) struct StyleInventory {
    pub(crate) links: Vec<String>,
    pub(crate) inline_styles: Vec<String>,
}

pub(crate) struct RewritePlan<'a> {
    /// Hrefs whose rules were inlined; only these links are deferred.
    pub(crate) deferred: &'a HashSet<&'a str>,
    pub(crate) critical_css: &'a str,
    pub(crate) font_preloads: &'a [String],
    /// Replacement CSS for each inline `<style>`, by position.
    pub(crate) inline_replacements: Option<&'a [String]>,
    pub(crate) preload: PreloadStrategy,
    pub(crate) noscript_fallback: bool,
}

pub(crate) struct Rewritten {
    pub(crate) html: String,
    pub(crate) deferred_links: usize,
}

pub(crate) fn collect_styles(html: &str) -> Result<StyleInventory, TransformError> {
    let inventory = Rc::new(RefCell::new(StyleInventory::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("link[rel][href]", {
                    let inventory = Rc::clone(&inventory);
                    move |el| {
                        if let (Some(rel), Some(href)) =
                            (el.get_attribute("rel"), el.get_attribute("href"))
                            && is_stylesheet_rel(&rel)
                        {
                            inventory.borrow_mut().links.push(href);
                        }
                        Ok(())
                    }
                }),
                element!("style", {
                    let inventory = Rc::clone(&inventory);
                    move |_| {
                        inventory.borrow_mut().inline_styles.push(String::new());
                        Ok(())
                    }
                }),
                text!("style", {
                    let inventory = Rc::clone(&inventory);
                    move |chunk| {
                        if let Some(css) = inventory.borrow_mut().inline_styles.last_mut() {
                            css.push_str(chunk.as_str());
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| TransformError::rewrite(err.to_string()))?;

    Ok(Rc::try_unwrap(inventory)
        .map(RefCell::into_inner)
        .unwrap_or_else(|shared| std::mem::take(&mut *shared.borrow_mut())))
}

#[derive(Default)]
struct ApplyState {
    style_index: usize,
    in_body: bool,
    injected: bool,
    deferred_links: usize,
    moved_links: Vec<String>,
}

/// Inline critical CSS and defer the stylesheets it was taken from.
///
/// The critical `<style>` goes right before the first deferred link so the
/// cascade keeps author styles that follow the link on top. Without a
/// deferred link it is appended to `<head>`, or placed before `<body>`.
pub(crate) fn apply(html: &str, plan: &RewritePlan<'_>) -> Result<Rewritten, TransformError> {
    let state = Rc::new(RefCell::new(ApplyState::default()));
    let injection = head_injection(plan);
    let anchor_on_link = !plan.deferred.is_empty();

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head", {
                    let state = Rc::clone(&state);
                    let injection = injection.clone();
                    move |el| {
                        let mut state = state.borrow_mut();
                        if !anchor_on_link && !state.injected && !injection.is_empty() {
                            el.append(&injection, ContentType::Html);
                            state.injected = true;
                        }
                        Ok(())
                    }
                }),
                element!("body", {
                    let state = Rc::clone(&state);
                    let injection = injection.clone();
                    move |el| {
                        let mut state = state.borrow_mut();
                        state.in_body = true;
                        if !anchor_on_link && !state.injected && !injection.is_empty() {
                            el.before(&injection, ContentType::Html);
                            state.injected = true;
                        }
                        let moved = std::mem::take(&mut state.moved_links);
                        if !moved.is_empty() {
                            el.append(&moved.concat(), ContentType::Html);
                        }
                        Ok(())
                    }
                }),
                element!("link[rel][href]", {
                    let state = Rc::clone(&state);
                    let injection = injection.clone();
                    move |el| {
                        let (Some(rel), Some(href)) =
                            (el.get_attribute("rel"), el.get_attribute("href"))
                        else {
                            return Ok(());
                        };
                        if !is_stylesheet_rel(&rel) || !plan.deferred.contains(href.as_str()) {
                            return Ok(());
                        }

                        let mut state = state.borrow_mut();
                        if !state.injected && !injection.is_empty() {
                            el.before(&injection, ContentType::Html);
                            state.injected = true;
                        }

                        let media = el.get_attribute("media");
                        match plan.preload {
                            PreloadStrategy::Media => {
                                let restore = media
                                    .as_deref()
                                    .filter(|media| !media.trim().is_empty())
                                    .unwrap_or("all");
                                el.set_attribute("media", "print")?;
                                el.set_attribute("onload", &format!("this.media='{restore}'"))?;
                            }
                            PreloadStrategy::Swap => {
                                el.set_attribute("rel", "preload")?;
                                el.set_attribute("as", "style")?;
                                el.set_attribute("onload", "this.rel='stylesheet'")?;
                            }
                            PreloadStrategy::Body => {
                                if state.in_body {
                                    return Ok(());
                                }
                                state.moved_links.push(stylesheet_link(&href, media.as_deref()));
                                el.remove();
                                state.deferred_links += 1;
                                return Ok(());
                            }
                            PreloadStrategy::None => return Ok(()),
                        }

                        if plan.noscript_fallback {
                            el.after(
                                &format!(
                                    "<noscript>{}</noscript>",
                                    stylesheet_link(&href, media.as_deref())
                                ),
                                ContentType::Html,
                            );
                        }
                        state.deferred_links += 1;
                        Ok(())
                    }
                }),
                element!("style", {
                    let state = Rc::clone(&state);
                    move |el| {
                        let Some(replacements) = plan.inline_replacements else {
                            return Ok(());
                        };
                        let mut state = state.borrow_mut();
                        let index = state.style_index;
                        state.style_index += 1;

                        match replacements.get(index) {
                            Some(css) if css.is_empty() => el.remove(),
                            Some(css) => el.set_inner_content(&guard_style_text(css), ContentType::Html),
                            None => {}
                        }
                        Ok(())
                    }
                }),
            ],
            document_content_handlers: vec![end!({
                let state = Rc::clone(&state);
                let injection = injection.clone();
                move |end| {
                    // Documents without <head> or <body> tags still keep what was taken out.
                    let mut state = state.borrow_mut();
                    if !state.injected && !injection.is_empty() {
                        end.append(&injection, ContentType::Html);
                        state.injected = true;
                    }
                    let moved = std::mem::take(&mut state.moved_links);
                    if !moved.is_empty() {
                        end.append(&moved.concat(), ContentType::Html);
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| TransformError::rewrite(err.to_string()))?;

    let deferred_links = state.borrow().deferred_links;
    Ok(Rewritten {
        html: rewritten,
        deferred_links,
    })
}

fn head_injection(plan: &RewritePlan<'_>) -> String {
    let mut html = String::new();
    if !plan.critical_css.is_empty() {
        html.push_str("<style>");
        html.push_str(&guard_style_text(plan.critical_css));
        html.push_str("</style>");
    }
    for href in plan.font_preloads {
        html.push_str("<link rel=\"preload\" href=\"");
        html.push_str(&escape_attribute(href));
        html.push_str("\" as=\"font\" crossorigin>");
    }
    html
}

fn stylesheet_link(href: &str, media: Option<&str>) -> String {
    let mut html = String::from("<link rel=\"stylesheet\" href=\"");
    html.push_str(&escape_attribute(href));
    html.push('"');
    if let Some(media) = media.filter(|media| !media.trim().is_empty()) {
        html.push_str(" media=\"");
        html.push_str(&escape_attribute(media));
        html.push('"');
    }
    html.push('>');
    html
}

fn is_stylesheet_rel(rel: &str) -> bool {
    let mut stylesheet = false;
    for token in rel.split_ascii_whitespace() {
        if token.eq_ignore_ascii_case("alternate") {
            return false;
        }
        stylesheet |= token.eq_ignore_ascii_case("stylesheet");
    }
    stylesheet
}

/// CSS text must not close the element it is inlined into.
fn guard_style_text(css: &str) -> String {
    css.replace("</style", "<\\/style")
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_lists_stylesheets_and_inline_styles_in_order() {
        let html = "<head><link rel=\"icon\" href=\"/f.ico\"><link rel=\"stylesheet\" href=\"/a.css\">\
                    <style>p{color:red}</style><link rel=\"alternate stylesheet\" href=\"/alt.css\">\
                    <link rel=\"Stylesheet\" href=\"/b.css\"></head>";
        let inventory = collect_styles(html).expect("inventory");

        assert_eq!(inventory.links, vec!["/a.css".to_string(), "/b.css".to_string()]);
        assert_eq!(inventory.inline_styles, vec!["p{color:red}".to_string()]);
    }

    #[test]
    fn media_strategy_preserves_original_media_query() {
        let deferred: HashSet<&str> = ["/a.css"].into_iter().collect();
        let plan = RewritePlan {
            deferred: &deferred,
            critical_css: "",
            font_preloads: &[],
            inline_replacements: None,
            preload: PreloadStrategy::Media,
            noscript_fallback: false,
        };
        let out = apply(
            "<head><link rel=\"stylesheet\" href=\"/a.css\" media=\"screen\"><link rel=\"stylesheet\" href=\"/other.css\"></head>",
            &plan,
        )
        .expect("rewrite");

        assert!(out.html.contains("onload=\"this.media='screen'\""));
        assert!(out.html.contains("<link rel=\"stylesheet\" href=\"/other.css\">"));
        assert_eq!(out.deferred_links, 1);
    }

    fn plan<'a>(
        deferred: &'a HashSet<&'a str>,
        critical_css: &'a str,
        preload: PreloadStrategy,
    ) -> RewritePlan<'a> {
        RewritePlan {
            deferred,
            critical_css,
            font_preloads: &[],
            inline_replacements: None,
            preload,
            noscript_fallback: true,
        }
    }

    #[test]
    fn critical_styles_precede_the_deferred_link_and_later_author_styles() {
        let deferred: HashSet<&str> = ["/app.css"].into_iter().collect();
        let out = apply(
            "<html><head><link rel=\"stylesheet\" href=\"/app.css\">\
             <style>.hero{color:blue}</style></head><body></body></html>",
            &plan(&deferred, ".hero{color:red}", PreloadStrategy::Media),
        )
        .expect("rewrite");

        let critical = out.html.find(".hero{color:red}").expect("critical style");
        let link = out.html.find("href=\"/app.css\"").expect("link");
        let author = out.html.find(".hero{color:blue}").expect("author style");
        assert!(critical < link && link < author, "{}", out.html);
        assert_eq!(out.html.matches(".hero{color:red}").count(), 1);
    }

    #[test]
    fn body_strategy_keeps_links_when_document_has_no_body_tag() {
        let deferred: HashSet<&str> = ["/app.css"].into_iter().collect();
        let out = apply(
            "<html><head><link rel=\"stylesheet\" href=\"/app.css\"></head><h1 class=\"hero\">x</h1></html>",
            &plan(&deferred, ".hero{color:red}", PreloadStrategy::Body),
        )
        .expect("rewrite");

        assert!(
            out.html.ends_with("<link rel=\"stylesheet\" href=\"/app.css\">"),
            "{}",
            out.html
        );
        assert!(out.html.starts_with("<html><head><style>.hero{color:red}</style></head>"));
        assert_eq!(out.deferred_links, 1);
    }

    #[test]
    fn body_strategy_moves_links_to_the_end_of_body() {
        let deferred: HashSet<&str> = ["/app.css"].into_iter().collect();
        let out = apply(
            "<html><head><link rel=\"stylesheet\" href=\"/app.css\" media=\"screen\"></head><body><p>x</p></body></html>",
            &plan(&deferred, "p{margin:0}", PreloadStrategy::Body),
        )
        .expect("rewrite");

        assert_eq!(
            out.html,
            "<html><head><style>p{margin:0}</style></head><body><p>x</p>\
             <link rel=\"stylesheet\" href=\"/app.css\" media=\"screen\"></body></html>"
        );
    }

    #[test]
    fn noscript_fallback_keeps_original_media() {
        let deferred: HashSet<&str> = ["/print.css"].into_iter().collect();
        let out = apply(
            "<head><link rel=\"stylesheet\" href=\"/print.css\" media=\"print and (color)\"></head>",
            &plan(&deferred, "", PreloadStrategy::Swap),
        )
        .expect("rewrite");

        assert!(out.html.contains(
            "<noscript><link rel=\"stylesheet\" href=\"/print.css\" media=\"print and (color)\"></noscript>"
        ));
    }

    #[test]
    fn critical_styles_land_before_body_without_head() {
        let deferred = HashSet::new();
        let plan = RewritePlan {
            deferred: &deferred,
            critical_css: "h1{margin:0}",
            font_preloads: &[],
            inline_replacements: None,
            preload: PreloadStrategy::Media,
            noscript_fallback: true,
        };
        let out = apply("<html><body><h1>x</h1></body></html>", &plan).expect("rewrite");

        assert_eq!(
            out.html,
            "<html><style>h1{margin:0}</style><body><h1>x</h1></body></html>"
        );
    }
}
