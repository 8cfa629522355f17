//! The mail store seam
//!
//! [`MailStore`] is the narrow set of IMAP primitives the sync core needs:
//! status, search, fetch, vanished and store. [`ImapStore`] implements it
//! over a live IMAP session; tests use an in-memory fake.

mod imap;

pub use imap::ImapStore;

use crate::envelope::Envelope;
use crate::error::StoreError;
use crate::flag::{Flag, flag_list};
use crate::headers::HeaderBlock;
use crate::mailbox::Mailbox;
use crate::mime::MimePart;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::future::Future;

pub type UidSet = BTreeSet<u32>;

/// Mail store operations consumed by the sync core.
///
/// Every method takes `&mut self`: a store is one session and serves one
/// request at a time.
pub trait MailStore: Send {
    fn status(
        &mut self,
        mailbox: &Mailbox,
    ) -> impl Future<Output = Result<MailboxStatus, StoreError>> + Send;

    fn search(
        &mut self,
        mailbox: &Mailbox,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<SearchResult, StoreError>> + Send;

    /// Fetch the requested items. Messages that do not exist are simply
    /// absent from the result.
    fn fetch(
        &mut self,
        mailbox: &Mailbox,
        query: &FetchQuery,
    ) -> impl Future<Output = Result<BTreeMap<u32, FetchResult>, StoreError>> + Send;

    /// UIDs from `uids` expunged since `since_modseq`.
    fn vanished(
        &mut self,
        mailbox: &Mailbox,
        since_modseq: u64,
        uids: &UidSet,
    ) -> impl Future<Output = Result<UidSet, StoreError>> + Send;

    fn store(
        &mut self,
        mailbox: &Mailbox,
        request: &StoreRequest,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Snapshot returned by `STATUS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub messages: u32,
    pub uid_next: u32,
    /// Zero when the store has no MODSEQ support.
    pub highest_mod_seq: u64,
    pub uid_validity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Internal date on or after this day.
    pub since: Option<NaiveDate>,
    /// Internal date strictly before this day.
    pub before: Option<NaiveDate>,
    /// Restrict to (or, with `exclude_uids`, away from) these UIDs.
    pub uids: Option<UidSet>,
    pub exclude_uids: bool,
    pub header: Option<(String, String)>,
}

impl SearchQuery {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn since(mut self, date: NaiveDate) -> Self {
        self.since = Some(date);
        self
    }

    #[must_use]
    pub const fn before(mut self, date: NaiveDate) -> Self {
        self.before = Some(date);
        self
    }

    #[must_use]
    pub fn within(mut self, uids: UidSet) -> Self {
        self.uids = Some(uids);
        self.exclude_uids = false;
        self
    }

    #[must_use]
    pub fn excluding(mut self, uids: UidSet) -> Self {
        self.uids = Some(uids);
        self.exclude_uids = true;
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.header = Some((name.to_string(), value.to_string()));
        self
    }

    /// A query restricted to an empty UID set can never match.
    #[must_use]
    pub fn matches_nothing(&self) -> bool {
        !self.exclude_uids && self.uids.as_ref().is_some_and(BTreeSet::is_empty)
    }

    /// Render as IMAP `UID SEARCH` criteria.
    #[must_use]
    pub fn to_imap(&self) -> String {
        let mut criteria = Vec::new();
        if let Some(uids) = self.uids.as_ref().filter(|u| !u.is_empty()) {
            let set = sequence_set(uids);
            criteria.push(if self.exclude_uids {
                format!("NOT UID {set}")
            } else {
                format!("UID {set}")
            });
        }
        if let Some(since) = self.since {
            criteria.push(format!("SINCE {}", imap_date(since)));
        }
        if let Some(before) = self.before {
            criteria.push(format!("BEFORE {}", imap_date(before)));
        }
        if let Some((name, value)) = &self.header {
            criteria.push(format!("HEADER {} {}", name, quote(value)));
        }
        if criteria.is_empty() {
            "ALL".to_string()
        } else {
            criteria.join(" ")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub matched: UidSet,
}

impl SearchResult {
    #[must_use]
    pub fn count(&self) -> usize {
        self.matched.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchIds {
    All,
    Uids(UidSet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub ids: FetchIds,
    pub structure: bool,
    pub flags: bool,
    pub envelope: bool,
    pub modseq: bool,
    pub header_text: bool,
    pub full: bool,
    /// Body sections to retrieve, by MIME id.
    pub body_parts: Vec<String>,
    /// Ask the store to undo the transfer encoding (IMAP `BINARY`).
    pub decode: bool,
    pub changed_since: Option<u64>,
}

impl FetchQuery {
    #[must_use]
    pub const fn new(ids: FetchIds) -> Self {
        Self {
            ids,
            structure: false,
            flags: false,
            envelope: false,
            modseq: false,
            header_text: false,
            full: false,
            body_parts: Vec::new(),
            decode: false,
            changed_since: None,
        }
    }

    #[must_use]
    pub fn uids(uids: impl IntoIterator<Item = u32>) -> Self {
        Self::new(FetchIds::Uids(uids.into_iter().collect()))
    }

    #[must_use]
    pub fn uid(uid: u32) -> Self {
        Self::uids([uid])
    }

    #[must_use]
    pub const fn with_structure(mut self) -> Self {
        self.structure = true;
        self
    }

    #[must_use]
    pub const fn with_flags(mut self) -> Self {
        self.flags = true;
        self
    }

    #[must_use]
    pub const fn with_envelope(mut self) -> Self {
        self.envelope = true;
        self
    }

    #[must_use]
    pub const fn with_modseq(mut self) -> Self {
        self.modseq = true;
        self
    }

    #[must_use]
    pub const fn with_header_text(mut self) -> Self {
        self.header_text = true;
        self
    }

    #[must_use]
    pub const fn with_full(mut self) -> Self {
        self.full = true;
        self
    }

    #[must_use]
    pub fn with_body_part(mut self, mime_id: &str) -> Self {
        if !self.body_parts.iter().any(|p| p == mime_id) {
            self.body_parts.push(mime_id.to_string());
        }
        self
    }

    #[must_use]
    pub const fn decoded(mut self) -> Self {
        self.decode = true;
        self
    }

    #[must_use]
    pub const fn changed_since(mut self, modseq: u64) -> Self {
        self.changed_since = Some(modseq);
        self.modseq = true;
        self
    }

    /// The `UID FETCH` item list, with a `CHANGEDSINCE` modifier when set.
    #[must_use]
    pub fn to_imap(&self) -> String {
        let mut items = vec!["UID".to_string()];
        if self.flags {
            items.push("FLAGS".into());
        }
        if self.modseq {
            items.push("MODSEQ".into());
        }
        if self.structure {
            items.push("BODYSTRUCTURE".into());
        }
        if self.envelope {
            items.push("ENVELOPE".into());
        }
        if self.header_text {
            items.push("BODY.PEEK[HEADER]".into());
        }
        if self.full {
            items.push("BODY.PEEK[]".into());
        }
        for part in &self.body_parts {
            items.push(format!("BODY.PEEK[{part}]"));
        }
        let mut out = format!("({})", items.join(" "));
        if let Some(modseq) = self.changed_since {
            let _ = write!(out, " (CHANGEDSINCE {modseq})");
        }
        out
    }
}

/// One section's content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyPartData {
    pub data: Vec<u8>,
    /// Whether the store already removed the transfer encoding.
    pub decoded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub modseq: Option<u64>,
    pub structure: Option<MimePart>,
    pub envelope: Option<Envelope>,
    pub header_text: Option<Vec<u8>>,
    pub full: Option<Vec<u8>>,
    pub body_parts: BTreeMap<String, BodyPartData>,
    /// Decoded section sizes, where the store reports them.
    pub body_part_sizes: BTreeMap<String, u64>,
}

impl FetchResult {
    #[must_use]
    pub fn body_part(&self, mime_id: &str) -> Option<&BodyPartData> {
        self.body_parts.get(mime_id)
    }

    #[must_use]
    pub fn body_part_size(&self, mime_id: &str) -> Option<u64> {
        self.body_part_sizes.get(mime_id).copied()
    }

    #[must_use]
    pub fn header_text(&self) -> Option<HeaderBlock> {
        self.header_text.clone().map(HeaderBlock::new)
    }

    #[must_use]
    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreRequest {
    pub uids: UidSet,
    pub add: Vec<Flag>,
    pub remove: Vec<Flag>,
}

impl StoreRequest {
    #[must_use]
    pub fn new(uids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            uids: uids.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn add(mut self, flag: Flag) -> Self {
        self.add.push(flag);
        self
    }

    #[must_use]
    pub fn remove(mut self, flag: Flag) -> Self {
        self.remove.push(flag);
        self
    }

    /// `UID STORE` commands, one per direction.
    #[must_use]
    pub fn to_imap(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if !self.add.is_empty() {
            commands.push(format!("+FLAGS.SILENT {}", flag_list(&self.add)));
        }
        if !self.remove.is_empty() {
            commands.push(format!("-FLAGS.SILENT {}", flag_list(&self.remove)));
        }
        commands
    }
}

/// Compress a UID set into IMAP sequence-set syntax (`1:3,7,9:10`).
#[must_use]
pub fn sequence_set(uids: &UidSet) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &uid in uids {
        match ranges.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(uid) => *end = uid,
            _ => ranges.push((uid, uid)),
        }
    }
    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
