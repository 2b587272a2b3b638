//! HTTP fetch tool: GET with HTML-to-text stripping and byte-range
//! pagination for long pages.

use rcore::{Error, ParamSpec, ParamType, Result, ToolSchema};

use super::required_str;
use crate::Registry;

/// Default page size in bytes.
const DEFAULT_LIMIT: usize = 8 * 1024;

pub fn register(registry: &Registry) -> Result<()> {
    registry.register_fn(
        ToolSchema::new(
            "fetch",
            "Fetch a URL. HTML pages are stripped to text; long bodies are paginated",
        )
        .param("url", ParamSpec::required(ParamType::String, "URL to fetch"))
        .param(
            "start",
            ParamSpec::optional(ParamType::Integer, "Byte offset to continue from"),
        )
        .param(
            "limit",
            ParamSpec::optional(ParamType::Integer, "Maximum bytes to return (default 8192)"),
        ),
        |_ctx, params| async move {
            let url = required_str(&params, "url")?.to_string();
            let start = params
                .get("start")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0) as usize;
            let limit = params
                .get("limit")
                .and_then(serde_json::Value::as_u64)
                .map(|l| l as usize)
                .unwrap_or(DEFAULT_LIMIT);

            let response = reqwest::get(&url)
                .await
                .map_err(|e| Error::tool("fetch", e))?;
            if !response.status().is_success() {
                return Err(Error::tool(
                    "fetch",
                    std::io::Error::other(format!("status {}", response.status())),
                ));
            }
            let html = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("text/html"));
            let body = response.text().await.map_err(|e| Error::tool("fetch", e))?;

            let text = if html { strip_html(&body) } else { body };
            Ok(paginate(&text, start, limit))
        },
    )
}

/// Strip an HTML document down to its visible text.
fn strip_html(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let text: Vec<&str> = document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    text.join("\n")
}

/// Cut a byte window out of the text, annotating continuation.
fn paginate(text: &str, start: usize, limit: usize) -> String {
    if start >= text.len() {
        return String::new();
    }
    let mut from = start.min(text.len());
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (from + limit).min(text.len());
    while !text.is_char_boundary(to) {
        to -= 1;
    }
    let mut window = text[from..to].to_string();
    if to < text.len() {
        window.push_str(&format!(
            "\n... [truncated, {} of {} bytes; continue with start={to}]",
            to - from,
            text.len()
        ));
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_keeps_visible_text() {
        let html = "<html><body><h1>Title</h1><p>Some <b>bold</b> text.</p></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("bold"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn paginate_windows_and_annotates() {
        let text = "abcdefghij";
        assert_eq!(paginate(text, 0, 100), "abcdefghij");
        let first = paginate(text, 0, 4);
        assert!(first.starts_with("abcd"));
        assert!(first.contains("start=4"));
        assert_eq!(paginate(text, 20, 4), "");
    }
}
