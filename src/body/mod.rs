//! Body representation negotiation
//!
//! Decides which of the plain, HTML and body-part representations a
//! device gets, fetches exactly the sections needed in one round trip,
//! and hands back UTF-8, CRLF-normalized, truncated bodies.

pub mod text;

use crate::error::Result;
use crate::message::{FetchedPart, MessageAdapter};
use crate::mime::MimePart;
use crate::store::MailStore;
use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;
use text::{char_len, html_to_plain, normalize_eol, text_to_html, to_utf8, truncate_chars};
use tracing::debug;

/// Per-representation device preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPref {
    /// Maximum body length in characters.
    pub truncation_size: Option<usize>,
    /// Send nothing rather than a truncated body.
    pub all_or_none: bool,
    /// Length of the preview snippet, in characters.
    pub preview: Option<usize>,
}

impl BodyPref {
    #[must_use]
    pub const fn truncated_at(size: usize) -> Self {
        Self {
            truncation_size: Some(size),
            all_or_none: false,
            preview: None,
        }
    }

    #[must_use]
    pub const fn all_or_none(mut self) -> Self {
        self.all_or_none = true;
        self
    }

    #[must_use]
    pub const fn with_preview(mut self, chars: usize) -> Self {
        self.preview = Some(chars);
        self
    }
}

/// What the device declared about MIME (S/MIME) body support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeSupport {
    #[default]
    None,
    /// Full MIME only for signed or encrypted messages.
    SmimeOnly,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPreferences {
    pub version: ProtocolVersion,
    pub plain: Option<BodyPref>,
    pub html: Option<BodyPref>,
    pub rtf: Option<BodyPref>,
    pub mime: Option<BodyPref>,
    /// A separate body-part request, distinct from the main body.
    pub body_part: Option<BodyPref>,
    pub mime_support: MimeSupport,
    /// Prefer HTML over full MIME when both are acceptable.
    pub save_bandwidth: bool,
    /// 2.5 clients send a single plain truncation length.
    pub legacy_truncation: Option<usize>,
}

impl BodyPreferences {
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_plain(mut self, pref: BodyPref) -> Self {
        self.plain = Some(pref);
        self
    }

    #[must_use]
    pub fn with_html(mut self, pref: BodyPref) -> Self {
        self.html = Some(pref);
        self
    }

    #[must_use]
    pub fn with_mime(mut self, pref: BodyPref) -> Self {
        self.mime = Some(pref);
        self
    }

    #[must_use]
    pub fn with_body_part(mut self, pref: BodyPref) -> Self {
        self.body_part = Some(pref);
        self
    }

    #[must_use]
    pub fn has_body_prefs(&self) -> bool {
        self.plain.is_some() || self.html.is_some() || self.rtf.is_some() || self.mime.is_some()
    }

    fn wants_html(&self) -> bool {
        self.version.supports_html()
            && (self.html.is_some() || self.mime.is_some() || self.body_part.is_some())
    }

    fn wants_plain(&self, want_html: bool, has_html: bool) -> bool {
        self.version.is_legacy()
            || !self.has_body_prefs()
            || self.plain.is_some()
            || self.rtf.is_some()
            || self.mime.is_some()
            || (want_html && !has_html)
    }

    /// Preference governing the plain body: the legacy single limit on
    /// 2.5, the plain preference otherwise.
    fn plain_pref(&self) -> BodyPref {
        if self.version.is_legacy() {
            return BodyPref {
                truncation_size: self.legacy_truncation,
                ..BodyPref::default()
            };
        }
        self.plain.clone().unwrap_or_default()
    }
}

/// Representation the main body is sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    Plain,
    Html,
    Rtf,
    Mime,
}

/// UTF-8 body content with CRLF line endings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyStream(String);

impl BodyStream {
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self(normalize_eol(text).into_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn char_len(&self) -> usize {
        char_len(&self.0)
    }

    /// The first `chars` characters.
    #[must_use]
    pub fn prefix(&self, chars: usize) -> &str {
        truncate_chars(&self.0, chars)
    }

    /// A reader over the content.
    #[must_use]
    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.0.as_bytes())
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRepresentation {
    /// Always `UTF-8` once negotiated.
    pub charset: String,
    pub body: BodyStream,
    pub truncated: bool,
    /// Size of the untruncated content in bytes.
    pub size_bytes: u64,
}

impl BodyRepresentation {
    /// Normalize `content`, then cut it to `pref`'s limit.
    ///
    /// `reported_size` is the store's decoded size, if known; the
    /// recorded size is never smaller than the normalized content so a
    /// truncated body is always strictly shorter than its size.
    fn build(content: &str, reported_size: Option<u64>, pref: &BodyPref, honor_all_or_none: bool) -> Self {
        let full = normalize_eol(content);
        let full_len = u64::try_from(full.len()).unwrap_or(u64::MAX);
        let size_bytes = reported_size.map_or(full_len, |s| s.max(full_len));
        let body = pref
            .truncation_size
            .map_or(full.as_ref(), |limit| truncate_chars(&full, limit));
        let truncated = body.len() < full.len();
        let body = if truncated && pref.all_or_none && honor_all_or_none {
            ""
        } else {
            body
        };
        Self {
            charset: "UTF-8".to_string(),
            body: BodyStream(body.to_string()),
            truncated,
            size_bytes,
        }
    }
}

/// Negotiated bodies for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyData {
    pub plain: Option<BodyRepresentation>,
    pub html: Option<BodyRepresentation>,
    pub body_part: Option<BodyRepresentation>,
    /// The plain body was rendered from the HTML part.
    pub html_as_plain: bool,
}

impl BodyData {
    /// The representation the main body should use.
    ///
    /// Full MIME wins whenever requested; devices that omit their MIME
    /// support declaration still ask for it. With `save_bandwidth`, an
    /// available HTML body is preferred over MIME.
    #[must_use]
    pub fn preferred_type(&self, prefs: &BodyPreferences) -> BodyType {
        let html = prefs.html.is_some() && self.html.is_some();
        if prefs.save_bandwidth {
            if html {
                BodyType::Html
            } else if prefs.mime.is_some() {
                BodyType::Mime
            } else {
                BodyType::Plain
            }
        } else if prefs.mime.is_some() {
            BodyType::Mime
        } else if html {
            BodyType::Html
        } else {
            BodyType::Plain
        }
    }
}

/// Section ids the negotiation decided to read.
#[derive(Debug, Default)]
struct Plan {
    text_id: Option<String>,
    html_id: Option<String>,
    want_plain: bool,
    want_html: bool,
    html_as_plain: bool,
    plain_pref: BodyPref,
}

impl Plan {
    fn new(structure: &MimePart, prefs: &BodyPreferences) -> Self {
        let text_id = structure.find_body("plain").map(|p| p.mime_id.clone());
        let html_id = structure.find_body("html").map(|p| p.mime_id.clone());

        let mut want_html = prefs.wants_html();
        let want_plain = prefs.wants_plain(want_html, html_id.is_some());

        let mut html_as_plain = false;
        if text_id.is_none() && want_plain && html_id.is_some() && prefs.mime.is_none() {
            want_html = true;
            html_as_plain = true;
        }

        let mut plain_pref = prefs.plain_pref();
        if prefs.plain.is_none() && want_plain && want_html {
            if let Some(html) = &prefs.html {
                plain_pref = html.clone();
            }
        }

        Self {
            text_id,
            html_id,
            want_plain,
            want_html,
            html_as_plain,
            plain_pref,
        }
    }

    /// Sections to fetch, in one batch.
    fn sections(&self, prefs: &BodyPreferences) -> Vec<&str> {
        let mut ids = Vec::new();
        let body_part = prefs.body_part.is_some();
        if self.want_plain || (body_part && self.html_id.is_none()) {
            ids.extend(self.text_id.as_deref());
        }
        if self.want_html || body_part {
            ids.extend(self.html_id.as_deref());
        }
        ids
    }
}

/// Negotiate body representations for `adapter`'s message.
///
/// # Errors
///
/// Returns [`crate::Error::MessageGone`] if the message disappeared
/// before its body could be read, or a store error from the fetch.
pub async fn negotiate<S: MailStore>(
    adapter: &mut MessageAdapter<'_, S>,
    prefs: &BodyPreferences,
) -> Result<BodyData> {
    let structure = adapter.structure().clone();
    let plan = Plan::new(&structure, prefs);
    let sections = plan.sections(prefs);
    debug!(
        "UID {}: plain={} html={} html_as_plain={} sections={:?}",
        adapter.uid(),
        plan.want_plain,
        plan.want_html,
        plan.html_as_plain,
        sections
    );

    let fetched = if sections.is_empty() {
        BTreeMap::new()
    } else {
        adapter.body_parts(&sections).await?
    };
    let all_or_none = prefs.version.supports_html();
    let content = |id: &str| -> Option<(String, Option<u64>)> {
        let FetchedPart { data, size } = fetched.get(id)?;
        let charset = structure.part(id).and_then(MimePart::charset);
        Some((to_utf8(data, charset), *size))
    };

    let mut result = BodyData::default();

    let text = plan.text_id.as_deref().and_then(content);
    let html = plan.html_id.as_deref().and_then(content);

    if let Some((plain, size)) = text.as_ref().filter(|_| plan.want_plain) {
        result.plain = Some(BodyRepresentation::build(
            plain,
            *size,
            &plan.plain_pref,
            all_or_none,
        ));
    }

    if let Some((markup, size)) = html.as_ref().filter(|_| plan.want_html) {
        if plan.html_as_plain {
            let rendered = html_to_plain(markup);
            result.plain = Some(BodyRepresentation::build(
                &rendered,
                None,
                &plan.plain_pref,
                all_or_none,
            ));
            result.html_as_plain = true;
        }
        if prefs.version.supports_html() {
            let pref = prefs.html.clone().unwrap_or_default();
            result.html = Some(BodyRepresentation::build(markup, *size, &pref, all_or_none));
        }
    }

    if let Some(pref) = &prefs.body_part {
        let source = match (&html, &text) {
            (Some((markup, size)), _) => Some((markup.clone(), *size)),
            (None, Some((plain, _))) => Some((text_to_html(plain), None)),
            (None, None) => None,
        };
        if let Some((body, size)) = source {
            result.body_part = Some(BodyRepresentation::build(&body, size, pref, false));
        }
    }

    Ok(result)
}
