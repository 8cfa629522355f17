//! One message as seen by a sync pass
//!
//! [`MessageAdapter`] is built from the mandatory fetch data (UID, MIME
//! structure, flags). Everything else is fetched on first use with one
//! round trip and kept for the adapter's lifetime.

use crate::body::text::{decode_transfer, to_utf8};
use crate::envelope::{Address, Envelope, address_list};
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::headers::HeaderBlock;
use crate::mailbox::Mailbox;
use crate::mime::{MimePart, TransferEncoding};
use crate::store::{FetchQuery, FetchResult, MailStore};
use crate::version::ProtocolVersion;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

/// Decoded contents of one fetched section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPart {
    pub data: Vec<u8>,
    /// Decoded size reported by the store, if any.
    pub size: Option<u64>,
}

/// A MIME part with its contents materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPart {
    pub mime_id: String,
    pub mime_type: String,
    pub name: Option<String>,
    pub charset: Option<String>,
    pub content_id: Option<String>,
    pub data: Vec<u8>,
}

impl DecodedPart {
    /// Contents as UTF-8 text, converted from the part's charset.
    #[must_use]
    pub fn text(&self) -> String {
        to_utf8(&self.data, self.charset.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentMethod {
    #[default]
    Normal,
    /// An embedded message (`message/rfc822`, MDN reports).
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// `mailbox:uid:mime_id`, handed back by the device to download.
    pub file_reference: String,
    pub display_name: String,
    /// Estimated decoded size in bytes.
    pub size: u64,
    pub method: AttachmentMethod,
    pub content_id: Option<String>,
    pub is_inline: bool,
}

/// Recipient lists in the two forms devices want.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToAddresses {
    /// Bare `local@host` addresses.
    pub to: Vec<String>,
    /// Display labels, falling back to the address.
    pub display_to: Vec<String>,
}

pub struct MessageAdapter<'s, S> {
    store: &'s mut S,
    mailbox: Mailbox,
    uid: u32,
    structure: MimePart,
    flags: Vec<Flag>,
    envelope: Option<Envelope>,
    headers: Option<HeaderBlock>,
    full: Option<Vec<u8>>,
    parts: BTreeMap<String, FetchedPart>,
}

impl<'s, S: MailStore> MessageAdapter<'s, S> {
    /// Charsets in `structure` are corrected before anything is read.
    pub fn new(
        store: &'s mut S,
        mailbox: Mailbox,
        uid: u32,
        mut structure: MimePart,
        flags: Vec<Flag>,
    ) -> Self {
        structure.correct_charsets();
        Self {
            store,
            mailbox,
            uid,
            structure,
            flags,
            envelope: None,
            headers: None,
            full: None,
            parts: BTreeMap::new(),
        }
    }

    /// Build from a fetch result, keeping whatever optional facets it
    /// already carries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the fetch did not include the MIME
    /// structure.
    pub fn from_fetch(store: &'s mut S, mailbox: Mailbox, fetched: FetchResult) -> Result<Self> {
        let structure = fetched
            .structure
            .ok_or_else(|| Error::Parse(format!("no BODYSTRUCTURE for UID {}", fetched.uid)))?;
        let mut adapter = Self::new(store, mailbox, fetched.uid, structure, fetched.flags);
        adapter.envelope = fetched.envelope;
        adapter.headers = fetched.header_text.map(HeaderBlock::new);
        adapter.full = fetched.full;
        Ok(adapter)
    }

    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    #[must_use]
    pub const fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    #[must_use]
    pub const fn structure(&self) -> &MimePart {
        &self.structure
    }

    #[must_use]
    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    #[must_use]
    pub fn flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    async fn fetch_one(&mut self, query: FetchQuery) -> Result<FetchResult> {
        let mut results = self
            .store
            .fetch(&self.mailbox, &query)
            .await
            .map_err(|e| Error::store("fetch", self.mailbox.as_str(), e))?;
        results.remove(&self.uid).ok_or(Error::MessageGone(self.uid))
    }

    /// # Errors
    ///
    /// Returns [`Error::MessageGone`] if the message disappeared, or a
    /// store error from the fetch.
    pub async fn envelope(&mut self) -> Result<&Envelope> {
        if self.envelope.is_none() {
            debug!("Fetching envelope for UID {}", self.uid);
            let fetched = self.fetch_one(FetchQuery::uid(self.uid).with_envelope()).await?;
            self.envelope = Some(fetched.envelope.unwrap_or_default());
        }
        Ok(self.envelope.get_or_insert_with(Envelope::default))
    }

    /// # Errors
    ///
    /// See [`Self::envelope`].
    pub async fn subject(&mut self) -> Result<String> {
        Ok(self.envelope().await?.subject().to_string())
    }

    /// The first `From` address, written out with its display name.
    ///
    /// # Errors
    ///
    /// See [`Self::envelope`].
    pub async fn from_address(&mut self) -> Result<Option<String>> {
        Ok(self.envelope().await?.from_address().map(ToString::to_string))
    }

    /// # Errors
    ///
    /// See [`Self::envelope`].
    pub async fn to_addresses(&mut self) -> Result<ToAddresses> {
        let envelope = self.envelope().await?;
        Ok(ToAddresses {
            to: envelope.to.iter().map(Address::bare_address).collect(),
            display_to: envelope.to.iter().map(Address::label).collect(),
        })
    }

    /// # Errors
    ///
    /// See [`Self::envelope`].
    pub async fn cc(&mut self) -> Result<String> {
        Ok(address_list(&self.envelope().await?.cc))
    }

    /// # Errors
    ///
    /// See [`Self::envelope`].
    pub async fn reply_to(&mut self) -> Result<Option<String>> {
        Ok(self.envelope().await?.reply_to.first().map(ToString::to_string))
    }

    /// # Errors
    ///
    /// See [`Self::envelope`].
    pub async fn date(&mut self) -> Result<Option<DateTime<FixedOffset>>> {
        Ok(self.envelope().await?.date)
    }

    /// The message header block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageGone`] if the message disappeared, or a
    /// store error from the fetch.
    pub async fn headers(&mut self) -> Result<&HeaderBlock> {
        if self.headers.is_none() {
            debug!("Fetching headers for UID {}", self.uid);
            let fetched = self
                .fetch_one(FetchQuery::uid(self.uid).with_header_text())
                .await?;
            self.headers = Some(HeaderBlock::new(fetched.header_text.unwrap_or_default()));
        }
        Ok(self.headers.get_or_insert_with(HeaderBlock::default))
    }

    /// The complete raw message.
    ///
    /// # Errors
    ///
    /// See [`Self::headers`].
    pub async fn full_message(&mut self) -> Result<&[u8]> {
        if self.full.is_none() {
            debug!("Fetching full message for UID {}", self.uid);
            let fetched = self.fetch_one(FetchQuery::uid(self.uid).with_full()).await?;
            self.full = Some(fetched.full.unwrap_or_default());
        }
        Ok(self.full.get_or_insert_with(Vec::new))
    }

    /// Fetch several sections in one round trip, transfer-decoded.
    ///
    /// Sections already fetched by this adapter are served from its
    /// cache; the rest go out in a single batched fetch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageGone`] if the message disappeared, or a
    /// store error from the fetch.
    pub async fn body_parts(&mut self, mime_ids: &[&str]) -> Result<BTreeMap<String, FetchedPart>> {
        let missing: Vec<&str> = mime_ids
            .iter()
            .copied()
            .filter(|id| !self.parts.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            let query = missing
                .iter()
                .fold(FetchQuery::uid(self.uid).decoded(), |q, id| q.with_body_part(id));
            let fetched = self.fetch_one(query).await?;
            for id in missing {
                let size = fetched.body_part_size(id);
                let data = match fetched.body_part(id) {
                    Some(part) if part.decoded => part.data.clone(),
                    Some(part) => {
                        let encoding = self
                            .structure
                            .part(id)
                            .map_or(TransferEncoding::SevenBit, |p| p.encoding.clone());
                        decode_transfer(&part.data, &encoding)
                    }
                    None => Vec::new(),
                };
                self.parts.insert(id.to_string(), FetchedPart { data, size });
            }
        }
        Ok(mime_ids
            .iter()
            .filter_map(|id| self.parts.get(*id).map(|p| ((*id).to_string(), p.clone())))
            .collect())
    }

    /// Decoded bytes of one section, optionally cut to `length` bytes.
    ///
    /// # Errors
    ///
    /// See [`Self::body_parts`].
    pub async fn body_part(&mut self, mime_id: &str, length: Option<usize>) -> Result<Vec<u8>> {
        let mut parts = self.body_parts(&[mime_id]).await?;
        let mut data = parts.remove(mime_id).map(|p| p.data).unwrap_or_default();
        if let Some(length) = length {
            data.truncate(length);
        }
        Ok(data)
    }

    /// One MIME part with its decoded contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown section, otherwise see
    /// [`Self::body_parts`].
    pub async fn mime_part(&mut self, mime_id: &str) -> Result<DecodedPart> {
        let part = self
            .structure
            .part(mime_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("part {mime_id} of UID {}", self.uid)))?;
        let data = self.body_part(mime_id, None).await?;
        Ok(DecodedPart {
            mime_id: part.mime_id.clone(),
            mime_type: part.mime_type(),
            name: part.name().map(ToString::to_string),
            charset: part.charset().map(ToString::to_string),
            content_id: part.content_id.clone(),
            data,
        })
    }

    #[must_use]
    pub fn is_attachment(&self, mime_id: &str, mime_type: &str) -> bool {
        self.structure.is_attachment(mime_id, mime_type)
    }

    #[must_use]
    pub fn has_attachments(&self) -> bool {
        self.structure.has_attachments()
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.structure.is_signed()
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.structure.is_encrypted()
    }

    /// Attachment descriptors, in tree order. Content id and inline
    /// disposition are only reported past 2.5.
    #[must_use]
    pub fn attachments(&self, version: ProtocolVersion) -> Vec<Attachment> {
        self.structure
            .attachment_candidates()
            .into_iter()
            .filter(|p| self.is_attachment(&p.mime_id, &p.mime_type()))
            .map(|p| Attachment {
                file_reference: self.mailbox.file_reference(self.uid, &p.mime_id),
                display_name: part_name(p),
                size: estimated_size(p),
                method: match p.mime_type().as_str() {
                    "message/rfc822" | "message/disposition-notification" => {
                        AttachmentMethod::Embedded
                    }
                    _ => AttachmentMethod::Normal,
                },
                content_id: p.content_id.clone().filter(|_| !version.is_legacy()),
                is_inline: !version.is_legacy() && p.is_inline(),
            })
            .collect()
    }

    /// A block of the original headers for quoting in a reply or
    /// forward, labels right aligned.
    ///
    /// # Errors
    ///
    /// See [`Self::headers`].
    pub async fn forward_headers(&mut self) -> Result<String> {
        let headers = self.headers().await?;
        let fields: Vec<(&str, String)> = ["Date", "From", "Reply-To", "Subject", "To", "Cc"]
            .into_iter()
            .filter_map(|name| {
                headers
                    .get(name)
                    .filter(|v| !v.is_empty())
                    .map(|v| (name, v))
            })
            .collect();
        let width = fields
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or_default()
            + 2;
        let mut out = String::new();
        for (name, value) in fields {
            let label = format!("{name}: ");
            let _ = writeln!(out, "{label:>width$}{value}");
        }
        Ok(out)
    }
}

/// Display name for a part: its description or file name, else a generic
/// label derived from the type.
fn part_name(part: &MimePart) -> String {
    if let Some(name) = part.description.as_deref().or_else(|| part.name()) {
        return name.to_string();
    }
    let kind = match part.primary.as_str() {
        "multipart" | "application" | "model" => part.subtype.as_str(),
        other => other,
    };
    match kind {
        "audio" => "Audio part".to_string(),
        "image" => "Image part".to_string(),
        "message" | "" => "Message part".to_string(),
        "multipart" => "Multipart part".to_string(),
        "text" => "Text part".to_string(),
        "video" => "Video part".to_string(),
        other => {
            let mut chars = other.chars();
            chars.next().map_or_else(
                || "Message part".to_string(),
                |first| format!("{}{} part", first.to_uppercase(), chars.as_str()),
            )
        }
    }
}

fn estimated_size(part: &MimePart) -> u64 {
    match part.encoding {
        TransferEncoding::Base64 => part.size / 4 * 3,
        _ => part.size,
    }
}
