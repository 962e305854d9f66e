//! Readable text from HTML error pages.
//!
//! Uses `scraper` for parsing. Page layout detection is separate from
//! extraction: [`PageKind::detect`] classifies the document, then
//! [`extract_text`] picks the matching extraction function.

use scraper::{ElementRef, Html, Selector};

/// Elements whose text is never shown.
const SKIPPED: &[&str] = &["head", "script", "style", "noscript", "template"];

/// Elements that end a line of text.
const BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "li", "main", "nav", "ol", "p", "pre", "section", "table", "tr", "ul",
];

/// Known error page layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Django's technical 500/404 page (`<div id="summary">` under `<body>`).
    DjangoDebug,
    /// Anything else.
    Generic,
}

impl PageKind {
    pub fn detect(document: &Html) -> Self {
        let summary = Selector::parse("body > div#summary")
            .ok()
            .and_then(|s| document.select(&s).next());
        match summary {
            Some(_) => PageKind::DjangoDebug,
            None => PageKind::Generic,
        }
    }
}

/// Extract the readable text of an HTML document.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    match PageKind::detect(&document) {
        PageKind::DjangoDebug => {
            django_summary(&document).unwrap_or_else(|| generic_text(&document))
        }
        PageKind::Generic => generic_text(&document),
    }
}

/// Strip all tags, keeping block structure as line breaks.
fn generic_text(document: &Html) -> String {
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);
    clean_lines(&raw)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED.contains(&name) {
        return;
    }
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            collect_text(child, out);
        }
    }
    if BLOCKS.contains(&name) {
        out.push('\n');
    }
}

/// Trim every line and keep at most one blank line in a row.
fn clean_lines(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                result.push('\n');
            }
        } else {
            blank_run = 0;
            result.push_str(&line);
            result.push('\n');
        }
    }
    result.trim().to_string()
}

/// Heading, exception value and request metadata of a Django debug page.
fn django_summary(document: &Html) -> Option<String> {
    let mut lines = Vec::new();

    if let Some(title) = select_first_text(document, "#summary h1") {
        lines.push(title);
    }
    if let Some(value) = select_first_text(document, "#summary pre.exception_value") {
        lines.push(value);
    }

    let rows = Selector::parse("#summary table.meta tr, #summary table.request tr").ok()?;
    let th = Selector::parse("th").ok()?;
    let td = Selector::parse("td").ok()?;
    let mut meta = Vec::new();
    for row in document.select(&rows) {
        let key = row.select(&th).next().map(|e| squash(&text_of(e)));
        let value = row.select(&td).next().map(|e| squash(&text_of(e)));
        if let (Some(key), Some(value)) = (key, value) {
            let key = key.trim_end_matches(':');
            if !key.is_empty() {
                meta.push(format!("{key}: {value}"));
            }
        }
    }
    if !meta.is_empty() {
        lines.push(String::new());
        lines.extend(meta);
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text = squash(&text_of(document.select(&selector).next()?));
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
