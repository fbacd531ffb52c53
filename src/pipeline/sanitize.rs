//! Body sanitizer: HTML → bounded plain text.

use std::borrow::Cow;

use html2text::render::text_renderer::TrivialDecorator;
use tracing::debug;

/// Longest sanitized body handed to the classifier.
pub const MAX_BODY_CHARS: usize = 4000;

/// Render width. Wider than the longest body we keep, so wrapping never
/// splits a word inside the kept prefix.
const RENDER_WIDTH: usize = 4096;

/// Raw-text elements whose content the renderer drops.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Sanitize a raw body (HTML or plain text) for classification.
///
/// Absent input yields an empty string. If the renderer fails, the first
/// [`MAX_BODY_CHARS`] characters of the raw input are used instead.
pub fn sanitize_body(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    match strip_html(raw) {
        Some(text) => truncate_chars(&text, MAX_BODY_CHARS).to_string(),
        None => truncate_chars(raw, MAX_BODY_CHARS).to_string(),
    }
}

/// Render HTML to text and collapse whitespace, without truncating.
///
/// Script/style content and comments are dropped and entities decoded.
/// Returns `None` only when the renderer itself fails.
pub fn strip_html(html: &str) -> Option<String> {
    let html = close_self_closing_raw_text(html);
    match html2text::config::with_decorator(TrivialDecorator::new())
        .string_from_read(html.as_bytes(), RENDER_WIDTH)
    {
        Ok(text) => Some(collapse_whitespace(&text)),
        Err(e) => {
            debug!(error = ?e, "HTML rendering failed");
            None
        }
    }
}

/// First `max` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Join words with single spaces. Box-drawing characters from rendered
/// table borders and rules count as whitespace.
fn collapse_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || ('\u{2500}'..='\u{257F}').contains(&c))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Give `<script .../>` and `<style/>` an explicit end tag.
///
/// HTML parsing ignores the self-closing slash on these elements, so
/// everything after one would be read as script text and dropped.
fn close_self_closing_raw_text(html: &str) -> Cow<'_, str> {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lowered = html.to_ascii_lowercase();
    let mut out = String::new();
    let mut copied = 0;
    let mut pos = 0;

    while let Some(offset) = lowered[pos..].find('<') {
        let start = pos + offset;
        pos = start + 1;
        let Some(name) = RAW_TEXT_ELEMENTS.iter().find(|name| {
            lowered[pos..].strip_prefix(**name).is_some_and(|rest| {
                rest.starts_with(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
            })
        }) else {
            continue;
        };
        let Some(end) = tag_end(&lowered[start..]).map(|end| start + end) else {
            break;
        };
        pos = end + 1;
        if lowered[..end].ends_with('/') {
            out.push_str(&html[copied..end - 1]);
            out.push_str("></");
            out.push_str(name);
            out.push('>');
            copied = end + 1;
        }
    }

    if copied == 0 {
        return Cow::Borrowed(html);
    }
    out.push_str(&html[copied..]);
    Cow::Owned(out)
}

/// Offset of the `>` ending the tag that opens `tag`, skipping quoted values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in tag.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}
