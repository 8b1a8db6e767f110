//! Normalization of raw fetched content into plain prose text.
//!
//! HTML payloads are reduced to their prose: scripts, styles, and
//! navigation boilerplate are dropped, block elements become paragraph
//! breaks, and whitespace is collapsed. Non-HTML payloads keep their
//! paragraph structure with the same whitespace collapse. Output is
//! deterministic for identical input.

use scraper::{ElementRef, Html};

/// Elements whose entire subtree is boilerplate rather than prose.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "nav", "header", "footer", "aside",
    "iframe", "svg", "form", "button",
];

/// Elements that open and close a paragraph-level block.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "main", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "pre", "table", "tr", "br", "figure", "figcaption",
];

/// Reduces raw fetched content to prose text.
///
/// Content starting with `<` is treated as HTML, anything else as plain
/// text (the same sniffing heuristic used when a document's media type is
/// unknown).
#[must_use]
pub fn normalize(raw: &str) -> String {
    if raw.trim_start().starts_with('<') {
        normalize_html(raw)
    } else {
        normalize_plain(raw)
    }
}

fn normalize_html(raw: &str) -> String {
    let document = Html::parse_document(raw);
    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    collect_prose(document.root_element(), &mut blocks, &mut current);
    flush_block(&mut current, &mut blocks);
    blocks.join("\n\n")
}

fn collect_prose(element: ElementRef<'_>, blocks: &mut Vec<String>, current: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    let is_block = BLOCK_ELEMENTS.contains(&name);
    if is_block {
        flush_block(current, blocks);
    }
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            collect_prose(child_element, blocks, current);
        } else if let Some(text) = child.value().as_text() {
            current.push_str(text);
            current.push(' ');
        }
    }
    if is_block {
        flush_block(current, blocks);
    }
}

fn flush_block(current: &mut String, blocks: &mut Vec<String>) {
    let collapsed = collapse_whitespace(current.as_str());
    current.clear();
    if !collapsed.is_empty() {
        blocks.push(collapsed);
    }
}

fn normalize_plain(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .split("\n\n")
        .map(collapse_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn collapse_whitespace(text: impl AsRef<str>) -> String {
    text.as_ref().split_whitespace().collect::<Vec<_>>().join(" ")
}
