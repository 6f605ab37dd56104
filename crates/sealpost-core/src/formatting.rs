//! Formatting utilities shared by the transports (escaping, truncation, dates).

use chrono::{DateTime, Utc};

/// Ellipsis appended to anything we cut short.
pub const ELLIPSIS: char = '…';

/// Escape the five reserved HTML characters.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Escape and turn newlines into `<br>` so line breaks survive in HTML mail.
pub fn html_paragraph(text: &str) -> String {
    escape_html(&text.replace("\r\n", "\n")).replace('\n', "<br>\n")
}

fn is_markdown_reserved(c: char) -> bool {
    matches!(c, '_' | '*' | '`' | '[')
}

/// Escape user text for Telegram's legacy `Markdown` parse mode.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_markdown_reserved(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape for legacy Markdown, keeping the *escaped* result within
/// `max_chars` characters. Over-long input is cut and ends with [`ELLIPSIS`].
///
/// An escape pair is never split.
pub fn escape_markdown_truncated(text: &str, max_chars: usize) -> String {
    let width = |c: char| if is_markdown_reserved(c) { 2 } else { 1 };

    let total: usize = text.chars().map(width).sum();
    if total <= max_chars {
        return escape_markdown(text);
    }

    let budget = max_chars.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0usize;
    for c in text.chars() {
        let w = width(c);
        if used + w > budget {
            break;
        }
        if w == 2 {
            out.push('\\');
        }
        out.push(c);
        used += w;
    }
    out.push(ELLIPSIS);
    out
}

/// Cut to at most `max_chars` characters, marking the cut with "...".
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// "March 3, 2025".
pub fn written_date(at: DateTime<Utc>) -> String {
    at.format("%B %-d, %Y").to_string()
}
