//! Raw header block access
//!
//! Wraps the `BODY[HEADER]` text of a message and answers case-insensitive
//! lookups with RFC 2047 encoded words decoded.

use chrono::{DateTime, FixedOffset};
use mailparse::MailHeaderMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    raw: Vec<u8>,
}

impl HeaderBlock {
    #[must_use]
    pub const fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// First value of header `name`, unfolded and decoded.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let (headers, _) = mailparse::parse_headers(&self.raw).ok()?;
        headers.get_first_value(name)
    }

    /// Every value of header `name`, in order of appearance.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<String> {
        mailparse::parse_headers(&self.raw)
            .map(|(headers, _)| headers.get_all_values(name))
            .unwrap_or_default()
    }

    /// The `Date` header, when present and well formed.
    #[must_use]
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.get("Date").and_then(|d| parse_date(&d))
    }

    /// Raw header lines for every header not in `skip`, folded lines kept
    /// intact. Used when re-emitting a message around a rebuilt body.
    #[must_use]
    pub fn lines_except(&self, skip: &[&str]) -> Vec<(String, String)> {
        let Ok((headers, _)) = mailparse::parse_headers(&self.raw) else {
            return Vec::new();
        };
        headers
            .iter()
            .filter(|h| {
                let key = h.get_key();
                !skip.iter().any(|s| {
                    s.strip_suffix('*').map_or_else(
                        || key.eq_ignore_ascii_case(s),
                        |prefix| {
                            key.get(..prefix.len())
                                .is_some_and(|k| k.eq_ignore_ascii_case(prefix))
                        },
                    )
                })
            })
            .map(|h| {
                (
                    h.get_key(),
                    String::from_utf8_lossy(h.get_value_raw()).trim().to_string(),
                )
            })
            .collect()
    }
}

/// Decode RFC 2047 encoded words in a single header value.
#[must_use]
pub fn decode_words(input: &str) -> String {
    let fake_header = format!("X: {input}");
    match mailparse::parse_header(fake_header.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => input.to_string(),
    }
}

/// Parse an RFC 2822 date, tolerating the trailing comments and
/// missing seconds seen in the wild.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(d) = DateTime::parse_from_rfc2822(value) {
        return Some(d);
    }
    let stripped = value.split(" (").next().unwrap_or(value);
    if let Ok(d) = DateTime::parse_from_rfc2822(stripped) {
        return Some(d);
    }
    mailparse::dateparse(value)
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|d| d.fixed_offset())
}
