//! Static HTML extraction.
//!
//! All parsing is synchronous on an owned HTML string; `scraper::Html` is
//! not `Send`, so nothing here may be held across an await point.

use scraper::{Html, Selector};
use std::collections::HashMap;
use tracing::warn;
use url::Url;

use crate::errors::{EngineError, EngineResult};

/// Fields pulled out of one HTML document.
#[derive(Debug, Default)]
pub struct ExtractedPage {
    pub title: String,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    /// External script URLs, in document order.
    pub scripts: Vec<String>,
}

fn compile(selector: &str) -> EngineResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| EngineError::Parse(format!("invalid selector {selector:?}: {e}")))
}

/// Parse `html` and extract title, text content, metadata, and resource
/// references. Relative link/image URLs are resolved against `base_url`.
///
/// A scoping `selector` restricts text content only; links, images, and
/// scripts always come from the whole document. A selector that matches
/// nothing leaves content empty and logs a warning.
pub fn extract_page(
    html: &str,
    base_url: &str,
    selector: Option<&str>,
) -> EngineResult<ExtractedPage> {
    let doc = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let mut page = ExtractedPage {
        title: extract_title(&doc)?,
        metadata: extract_metadata(&doc)?,
        ..ExtractedPage::default()
    };

    page.content = match selector {
        Some(sel) => {
            let scoped = compile(sel)?;
            let mut parts = Vec::new();
            for element in doc.select(&scoped) {
                let text = normalize_text(element.text());
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            if parts.is_empty() {
                warn!(selector = sel, url = base_url, "selector matched no elements");
            }
            parts.join("\n")
        }
        None => {
            let body = compile("body")?;
            doc.select(&body)
                .next()
                .map(|el| normalize_text(el.text()))
                .unwrap_or_default()
        }
    };

    page.links = collect_attr(&doc, &compile("a[href]")?, "href", base.as_ref());
    page.images = collect_attr(&doc, &compile("img[src]")?, "src", base.as_ref());
    page.scripts = collect_attr(&doc, &compile("script[src]")?, "src", base.as_ref());

    Ok(page)
}

/// Structured extraction: each named selector maps to the text of its
/// first match, or an empty string when nothing matches.
pub fn extract_fields(
    html: &str,
    fields: &HashMap<String, String>,
) -> EngineResult<HashMap<String, String>> {
    let doc = Html::parse_document(html);
    let mut out = HashMap::with_capacity(fields.len());
    for (name, selector) in fields {
        let sel = compile(selector)?;
        let value = doc
            .select(&sel)
            .next()
            .map(|el| normalize_text(el.text()))
            .unwrap_or_default();
        out.insert(name.clone(), value);
    }
    Ok(out)
}

/// Bodies of inline `<script>` elements (no `src`), in document order.
/// Used by the hybrid strategy, both for counting and for execution.
pub fn inline_scripts(html: &str) -> EngineResult<Vec<String>> {
    let doc = Html::parse_document(html);
    let script = compile("script")?;
    Ok(doc
        .select(&script)
        .filter(|el| el.value().attr("src").is_none())
        .filter_map(|el| {
            let body = el.text().collect::<String>();
            let trimmed = body.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect())
}

/// Count of all `<script>` elements, external and inline.
pub fn script_count(html: &str) -> EngineResult<usize> {
    let doc = Html::parse_document(html);
    let script = compile("script")?;
    Ok(doc.select(&script).count())
}

fn extract_title(doc: &Html) -> EngineResult<String> {
    let title = compile("title")?;
    Ok(doc
        .select(&title)
        .next()
        .map(|el| normalize_text(el.text()))
        .unwrap_or_default())
}

fn extract_metadata(doc: &Html) -> EngineResult<HashMap<String, String>> {
    let meta = compile("meta")?;
    let mut out = HashMap::new();
    for el in doc.select(&meta) {
        let key = el
            .value()
            .attr("name")
            .or_else(|| el.value().attr("property"));
        if let (Some(key), Some(content)) = (key, el.value().attr("content")) {
            out.insert(key.to_string(), content.to_string());
        }
    }
    Ok(out)
}

fn collect_attr(doc: &Html, selector: &Selector, attr: &str, base: Option<&Url>) -> Vec<String> {
    doc.select(selector)
        .filter_map(|el| el.value().attr(attr))
        .filter(|v| !v.trim().is_empty())
        .map(|v| resolve_url(v, base))
        .collect()
}

/// Resolve a possibly-relative URL against the page base. Values that do
/// not resolve are kept verbatim so callers still see what was on the page.
fn resolve_url(raw: &str, base: Option<&Url>) -> String {
    match base {
        Some(base) => base
            .join(raw)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| raw.to_string()),
        None => raw.to_string(),
    }
}

fn normalize_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let joined = parts.collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}
