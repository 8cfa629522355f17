//! MIME structure of a message as reported by the mail store
//!
//! Part identifiers follow IMAP section numbering: a multipart root is
//! `0`, a single-part root is `1`, children are `1`, `2`, ... and nested
//! parts `2.1`, `2.2`. The body of an embedded `message/rfc822` at `2`
//! is `2.0` when it is multipart, `2.1` otherwise.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferEncoding {
    #[default]
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    Other(String),
}

impl TransferEncoding {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "7bit" | "" => Self::SevenBit,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One node of a message's MIME tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MimePart {
    pub mime_id: String,
    /// Lowercased primary type, e.g. `text`.
    pub primary: String,
    /// Lowercased subtype, e.g. `plain`.
    pub subtype: String,
    /// Content-Type parameters, keys lowercased.
    pub params: BTreeMap<String, String>,
    /// Lowercased disposition type (`inline`, `attachment`).
    pub disposition: Option<String>,
    pub disposition_params: BTreeMap<String, String>,
    pub content_id: Option<String>,
    pub description: Option<String>,
    pub encoding: TransferEncoding,
    /// Encoded size in octets, as reported by BODYSTRUCTURE.
    pub size: u64,
    pub parts: Vec<MimePart>,
}

impl MimePart {
    /// A leaf part of the given type, not yet numbered.
    #[must_use]
    pub fn leaf(primary: &str, subtype: &str) -> Self {
        Self {
            primary: primary.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn multipart(subtype: &str, parts: Vec<Self>) -> Self {
        Self {
            parts,
            ..Self::leaf("multipart", subtype)
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_disposition(mut self, disposition: &str, filename: Option<&str>) -> Self {
        self.disposition = Some(disposition.to_ascii_lowercase());
        if let Some(name) = filename {
            self.disposition_params
                .insert("filename".to_string(), name.to_string());
        }
        self
    }

    /// Assign section identifiers to the whole tree, treating `self` as
    /// the message root.
    #[must_use]
    pub fn numbered(mut self) -> Self {
        let root_id = if self.is_multipart() { "0" } else { "1" };
        self.assign_ids(root_id);
        self
    }

    fn assign_ids(&mut self, id: &str) {
        self.mime_id = id.to_string();
        if self.is_multipart() {
            let prefix = child_prefix(id);
            for (i, child) in self.parts.iter_mut().enumerate() {
                child.assign_ids(&format!("{prefix}{}", i + 1));
            }
        } else if let Some(child) = self.parts.first_mut() {
            // Embedded message body.
            let child_id = if child.is_multipart() {
                format!("{id}.0")
            } else {
                format!("{id}.1")
            };
            child.assign_ids(&child_id);
        }
    }

    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.primary, self.subtype)
    }

    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.primary == "multipart"
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Declared charset, if any.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    /// Filename from the disposition, falling back to the `name`
    /// content-type parameter.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.disposition_params
            .get("filename")
            .or_else(|| self.params.get("name"))
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.disposition.as_deref() == Some("inline")
    }

    /// Reinterpret `ISO-8859-1` as `windows-1252` throughout the tree.
    /// Mail agents routinely label cp1252 text as Latin-1.
    pub fn correct_charsets(&mut self) {
        if let Some(cs) = self.params.get_mut("charset")
            && cs.eq_ignore_ascii_case("iso-8859-1")
        {
            *cs = "windows-1252".to_string();
        }
        for child in &mut self.parts {
            child.correct_charsets();
        }
    }

    /// Depth-first, pre-order list of every part in the tree.
    #[must_use]
    pub fn walk(&self) -> Vec<&Self> {
        let mut out = vec![self];
        for child in &self.parts {
            out.extend(child.walk());
        }
        out
    }

    /// Look up a part by section identifier.
    #[must_use]
    pub fn part(&self, mime_id: &str) -> Option<&Self> {
        self.walk().into_iter().find(|p| p.mime_id == mime_id)
    }

    /// `(mime_id, mime_type)` pairs in tree order.
    #[must_use]
    pub fn content_type_map(&self) -> Vec<(String, String)> {
        self.walk()
            .into_iter()
            .map(|p| (p.mime_id.clone(), p.mime_type()))
            .collect()
    }

    /// First displayable `text/<subtype>` part, skipping explicit
    /// attachments and embedded messages.
    #[must_use]
    pub fn find_body(&self, subtype: &str) -> Option<&Self> {
        if self.primary == "text"
            && self.subtype == subtype
            && self.disposition.as_deref() != Some("attachment")
        {
            return Some(self);
        }
        if self.is_multipart() {
            return self.parts.iter().find_map(|p| p.find_body(subtype));
        }
        None
    }

    #[must_use]
    pub fn find_type(&self, mime_type: &str) -> Option<&Self> {
        self.walk().into_iter().find(|p| p.mime_type() == mime_type)
    }

    /// Whether the part at `mime_id` of type `mime_type` is listed as an
    /// attachment of this (root) message.
    ///
    /// Plain text, multipart containers, TNEF wrappers, detached
    /// signatures and `message/*` parts other than `rfc822` and
    /// `disposition-notification` never are. HTML only counts when it is
    /// not the message's own HTML body.
    #[must_use]
    pub fn is_attachment(&self, mime_id: &str, mime_type: &str) -> bool {
        let mime_type = mime_type.to_ascii_lowercase();
        match mime_type.as_str() {
            "text/plain"
            | "application/ms-tnef"
            | "application/pkcs7-signature"
            | "application/x-pkcs7-signature" => false,
            "text/html" => self.find_body("html").map(|p| p.mime_id.as_str()) != Some(mime_id),
            "message/rfc822" | "message/disposition-notification" => true,
            t if t.starts_with("multipart/") || t.starts_with("message/") => false,
            _ => true,
        }
    }

    /// Parts that may be attachments: the tree without the contents of
    /// embedded messages, which travel inside their container.
    #[must_use]
    pub fn attachment_candidates(&self) -> Vec<&Self> {
        let mut out = vec![self];
        if self.is_multipart() {
            for child in &self.parts {
                out.extend(child.attachment_candidates());
            }
        }
        out
    }

    #[must_use]
    pub fn has_attachments(&self) -> bool {
        self.attachment_candidates()
            .iter()
            .any(|p| self.is_attachment(&p.mime_id, &p.mime_type()))
    }

    /// The first `text/calendar` part, if the message carries an iTip.
    #[must_use]
    pub fn icalendar_part(&self) -> Option<&Self> {
        self.find_type("text/calendar")
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        match self.mime_type().as_str() {
            "multipart/signed" => true,
            "application/pkcs7-mime" | "application/x-pkcs7-mime" => self
                .param("smime-type")
                .is_some_and(|t| t.eq_ignore_ascii_case("signed-data")),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        match self.mime_type().as_str() {
            "multipart/encrypted" => true,
            "application/pkcs7-mime" | "application/x-pkcs7-mime" => !self
                .param("smime-type")
                .is_some_and(|t| t.eq_ignore_ascii_case("signed-data")),
            _ => false,
        }
    }
}

fn child_prefix(id: &str) -> String {
    if id == "0" {
        String::new()
    } else if let Some(stripped) = id.strip_suffix(".0") {
        format!("{stripped}.")
    } else {
        format!("{id}.")
    }
}

/// The identifier following `mime_id` at the same depth (`1.2` -> `1.3`).
#[must_use]
pub fn next_sibling_id(mime_id: &str) -> Option<String> {
    let (prefix, last) = match mime_id.rsplit_once('.') {
        Some((prefix, last)) => (Some(prefix), last),
        None => (None, mime_id),
    };
    let next = last.parse::<u32>().ok()?.checked_add(1)?;
    Some(prefix.map_or_else(|| next.to_string(), |p| format!("{p}.{next}")))
}
