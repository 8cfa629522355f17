//! Content normalization helpers: transfer decoding, charset conversion,
//! line endings, truncation and HTML/plain conversion.

use crate::mime::TransferEncoding;
use base64::Engine;
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;

/// Line width handed to the HTML renderer; wide enough that paragraphs
/// are not hard wrapped.
const HTML2TEXT_WIDTH: usize = 400;

/// Undo a content-transfer-encoding. Malformed input is returned as is.
#[must_use]
pub fn decode_transfer(raw: &[u8], encoding: &TransferEncoding) -> Vec<u8> {
    match encoding {
        TransferEncoding::QuotedPrintable => {
            quoted_printable::decode(raw, quoted_printable::ParseMode::Robust)
                .unwrap_or_else(|_| raw.to_vec())
        }
        TransferEncoding::Base64 => {
            let cleaned: Vec<u8> = raw
                .iter()
                .filter(|b| !b.is_ascii_whitespace())
                .copied()
                .collect();
            base64::engine::general_purpose::STANDARD
                .decode(&cleaned)
                .unwrap_or_else(|_| raw.to_vec())
        }
        _ => raw.to_vec(),
    }
}

/// Convert `bytes` in `charset` to UTF-8. Unknown labels are read as
/// UTF-8; invalid sequences become U+FFFD.
#[must_use]
pub fn to_utf8(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Normalize every line ending (`\n`, `\r`, `\r\n`) to `\r\n`.
#[must_use]
pub fn normalize_eol(text: &str) -> Cow<'_, str> {
    if !text.contains(['\r', '\n']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + text.len() / 32);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The first `max_chars` characters of `text`. Never splits a character.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render HTML as plain text, falling back to the raw markup if the
/// renderer rejects it.
#[must_use]
pub fn html_to_plain(html: &str) -> String {
    html2text::from_read(html.as_bytes(), HTML2TEXT_WIDTH).unwrap_or_else(|_| html.to_string())
}

/// Minimal plain to HTML conversion: escape markup and keep line breaks.
#[must_use]
pub fn text_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        for c in line.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                c => out.push(c),
            }
        }
        if lines.peek().is_some() {
            out.push_str("<br />\n");
        }
    }
    out
}
