//! In-memory mail store for integration testing
//!
//! [`FakeStore`] implements [`MailStore`] over folders built with
//! [`MailboxBuilder`], speaking enough of IMAP's semantics to exercise
//! the sync core end to end:
//!
//! - `STATUS` counters, with CONDSTORE folders bumping MODSEQ on every
//!   insert, flag change and expunge
//! - `SEARCH` by internal date window, UID restriction and header
//! - `FETCH` with `CHANGEDSINCE`, BODYSTRUCTURE and sections parsed from
//!   the raw message with `mailparse`
//! - `VANISHED` for expunges past a MODSEQ
//!
//! Every call is logged so tests can assert on round trips, and any
//! operation can be made to fail once.

#![allow(dead_code)]

pub mod mailbox;

pub use mailbox::{Folder, MailboxBuilder, TestMessage};

use imap_activesync::envelope::{Address, Envelope};
use imap_activesync::headers::{HeaderBlock, parse_date};
use imap_activesync::mime::{MimePart, TransferEncoding};
use imap_activesync::store::{
    BodyPartData, FetchIds, FetchQuery, FetchResult, MailStore, MailboxStatus, SearchQuery,
    SearchResult, StoreRequest, UidSet,
};
use imap_activesync::{Mailbox, StoreError};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use std::collections::BTreeMap;

type Hook = Box<dyn FnOnce(&mut Folder) + Send>;

pub struct FakeStore {
    folders: BTreeMap<String, Folder>,
    after_status: BTreeMap<String, Hook>,
    failures: Vec<&'static str>,
    calls: Vec<&'static str>,
    fetches: Vec<FetchQuery>,
    stores: Vec<StoreRequest>,
}

impl FakeStore {
    pub fn new(folders: BTreeMap<String, Folder>) -> Self {
        Self {
            folders,
            after_status: BTreeMap::new(),
            failures: Vec::new(),
            calls: Vec::new(),
            fetches: Vec::new(),
            stores: Vec::new(),
        }
    }

    /// # Panics
    ///
    /// Panics if the folder does not exist.
    pub fn folder_mut(&mut self, name: &str) -> &mut Folder {
        self.folders.get_mut(name).expect("no such test folder")
    }

    pub fn remove_folder(&mut self, name: &str) {
        self.folders.remove(name);
    }

    /// Run `hook` against the folder right after the next `STATUS`
    /// snapshot, as if another client changed it mid-sync.
    pub fn after_status(&mut self, name: &str, hook: impl FnOnce(&mut Folder) + Send + 'static) {
        self.after_status.insert(name.to_string(), Box::new(hook));
    }

    /// Make the next call of `op` fail with a protocol error.
    pub fn fail_next(&mut self, op: &'static str) {
        self.failures.push(op);
    }

    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    pub fn fetches(&self) -> &[FetchQuery] {
        &self.fetches
    }

    pub fn stores(&self) -> &[StoreRequest] {
        &self.stores
    }

    pub fn clear_log(&mut self) {
        self.calls.clear();
        self.fetches.clear();
        self.stores.clear();
    }

    fn begin(&mut self, op: &'static str) -> Result<(), StoreError> {
        self.calls.push(op);
        if let Some(pos) = self.failures.iter().position(|f| *f == op) {
            self.failures.remove(pos);
            return Err(StoreError::Protocol(format!("{op} failed (injected)")));
        }
        Ok(())
    }

    fn folder(&self, mailbox: &Mailbox) -> Result<&Folder, StoreError> {
        self.folders
            .get(mailbox.as_str())
            .ok_or_else(|| StoreError::NoSuchMailbox(mailbox.to_string()))
    }
}

impl MailStore for FakeStore {
    async fn status(&mut self, mailbox: &Mailbox) -> Result<MailboxStatus, StoreError> {
        self.begin("status")?;
        let folder = self.folder(mailbox)?;
        let status = MailboxStatus {
            messages: u32::try_from(folder.messages.len()).unwrap_or(u32::MAX),
            uid_next: folder.uid_next,
            highest_mod_seq: folder.highest_mod_seq,
            uid_validity: folder.uid_validity,
        };
        if let Some(hook) = self.after_status.remove(mailbox.as_str()) {
            hook(self.folder_mut(mailbox.as_str()));
        }
        Ok(status)
    }

    async fn search(&mut self, mailbox: &Mailbox, query: &SearchQuery) -> Result<SearchResult, StoreError> {
        self.begin("search")?;
        let folder = self.folder(mailbox)?;
        let matched = folder
            .messages
            .values()
            .filter(|m| matches_search(m, query))
            .map(|m| m.uid)
            .collect();
        Ok(SearchResult { matched })
    }

    async fn fetch(
        &mut self,
        mailbox: &Mailbox,
        query: &FetchQuery,
    ) -> Result<BTreeMap<u32, FetchResult>, StoreError> {
        self.begin("fetch")?;
        self.fetches.push(query.clone());
        let folder = self.folder(mailbox)?;
        Ok(folder
            .messages
            .values()
            .filter(|m| match &query.ids {
                FetchIds::All => true,
                FetchIds::Uids(uids) => uids.contains(&m.uid),
            })
            .filter(|m| query.changed_since.is_none_or(|since| m.modseq > since))
            .map(|m| (m.uid, fetch_result(m, query)))
            .collect())
    }

    async fn vanished(
        &mut self,
        mailbox: &Mailbox,
        since_modseq: u64,
        uids: &UidSet,
    ) -> Result<UidSet, StoreError> {
        self.begin("vanished")?;
        let folder = self.folder(mailbox)?;
        Ok(folder
            .expunged
            .iter()
            .filter(|(uid, modseq)| **modseq > since_modseq && uids.contains(uid))
            .map(|(uid, _)| *uid)
            .collect())
    }

    async fn store(&mut self, mailbox: &Mailbox, request: &StoreRequest) -> Result<(), StoreError> {
        self.begin("store")?;
        self.stores.push(request.clone());
        self.folder(mailbox)?;
        let folder = self.folder_mut(mailbox.as_str());
        let modseq = folder.next_mod_seq();
        for uid in &request.uids {
            if let Some(message) = folder.messages.get_mut(uid) {
                message.flags.retain(|f| !request.remove.contains(f));
                for flag in &request.add {
                    if !message.flags.contains(flag) {
                        message.flags.push(flag.clone());
                    }
                }
                message.modseq = modseq;
            }
        }
        Ok(())
    }
}

fn matches_search(message: &TestMessage, query: &SearchQuery) -> bool {
    if query.since.is_some_and(|d| message.internal_date < d) {
        return false;
    }
    if query.before.is_some_and(|d| message.internal_date >= d) {
        return false;
    }
    if let Some(uids) = &query.uids {
        if uids.contains(&message.uid) == query.exclude_uids {
            return false;
        }
    }
    if let Some((name, value)) = &query.header {
        let headers = HeaderBlock::new(header_text(&message.raw));
        let needle = value.to_lowercase();
        if !headers
            .get_all(name)
            .iter()
            .any(|v| v.to_lowercase().contains(&needle))
        {
            return false;
        }
    }
    true
}

fn fetch_result(message: &TestMessage, query: &FetchQuery) -> FetchResult {
    let parsed = ParsedMessage::parse(&message.raw);
    let mut result = FetchResult {
        uid: message.uid,
        modseq: query.modseq.then_some(message.modseq),
        ..FetchResult::default()
    };
    if query.flags {
        result.flags.clone_from(&message.flags);
    }
    if query.structure {
        result.structure = Some(parsed.structure.clone());
    }
    if query.envelope {
        result.envelope = Some(parsed.envelope.clone());
    }
    if query.header_text {
        result.header_text = Some(parsed.header_text.clone());
    }
    if query.full {
        result.full = Some(message.raw.clone());
    }
    for id in &query.body_parts {
        if let Some(data) = parsed.sections.get(id) {
            result.body_parts.insert(
                id.clone(),
                BodyPartData {
                    data: data.clone(),
                    decoded: true,
                },
            );
            result
                .body_part_sizes
                .insert(id.clone(), u64::try_from(data.len()).unwrap_or(u64::MAX));
        }
    }
    result
}

/// What the store derives from a raw message.
struct ParsedMessage {
    structure: MimePart,
    /// Transfer-decoded section contents by MIME id.
    sections: BTreeMap<String, Vec<u8>>,
    header_text: Vec<u8>,
    envelope: Envelope,
}

impl ParsedMessage {
    fn parse(raw: &[u8]) -> Self {
        let mail = mailparse::parse_mail(raw).expect("test message must parse");
        let mut data = Vec::new();
        let structure = convert(&mail, &mut data).numbered();
        let sections = structure
            .walk()
            .into_iter()
            .map(|p| p.mime_id.clone())
            .zip(data)
            .collect();
        Self {
            structure,
            sections,
            header_text: header_text(raw),
            envelope: envelope(&mail),
        }
    }
}

/// Pre-order conversion; `data` receives each node's decoded body.
fn convert(mail: &ParsedMail<'_>, data: &mut Vec<Vec<u8>>) -> MimePart {
    let (primary, subtype) = mail
        .ctype
        .mimetype
        .split_once('/')
        .unwrap_or(("text", "plain"));
    let mut part = if primary == "multipart" {
        data.push(Vec::new());
        let children = mail.subparts.iter().map(|p| convert(p, data)).collect();
        MimePart::multipart(subtype, children)
    } else {
        let body = mail.get_body_raw().unwrap_or_default();
        let size = u64::try_from(body.len()).unwrap_or(u64::MAX);
        data.push(body);
        MimePart::leaf(primary, subtype).with_size(size)
    };
    for (key, value) in &mail.ctype.params {
        part = part.with_param(key, value);
    }
    if let Some(encoding) = mail.headers.get_first_value("Content-Transfer-Encoding") {
        part = part.with_encoding(TransferEncoding::parse(&encoding));
    }
    if mail.headers.get_first_value("Content-Disposition").is_some() {
        let disposition = mail.get_content_disposition();
        let kind = match &disposition.disposition {
            DispositionType::Inline => "inline".to_string(),
            DispositionType::Attachment => "attachment".to_string(),
            DispositionType::FormData => "form-data".to_string(),
            DispositionType::Extension(other) => other.to_lowercase(),
        };
        part.disposition = Some(kind);
        part.disposition_params = disposition.params;
    }
    part.content_id = mail
        .headers
        .get_first_value("Content-ID")
        .map(|id| id.trim().trim_matches(['<', '>']).to_string());
    part
}

/// The header block including its terminating blank line.
fn header_text(raw: &[u8]) -> Vec<u8> {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 2))
        .unwrap_or(raw.len());
    raw[..end].to_vec()
}

fn envelope(mail: &ParsedMail<'_>) -> Envelope {
    let headers = &mail.headers;
    Envelope {
        date: headers.get_first_value("Date").and_then(|d| parse_date(&d)),
        subject: headers.get_first_value("Subject"),
        from: addresses(headers.get_first_value("From")),
        sender: addresses(headers.get_first_value("Sender")),
        reply_to: addresses(headers.get_first_value("Reply-To")),
        to: addresses(headers.get_first_value("To")),
        cc: addresses(headers.get_first_value("Cc")),
        bcc: addresses(headers.get_first_value("Bcc")),
        in_reply_to: headers.get_first_value("In-Reply-To"),
        message_id: headers.get_first_value("Message-ID"),
    }
}

fn addresses(value: Option<String>) -> Vec<Address> {
    let Some(list) = value.and_then(|v| mailparse::addrparse(&v).ok()) else {
        return Vec::new();
    };
    list.iter()
        .flat_map(|addr| match addr {
            MailAddr::Single(single) => vec![single.clone()],
            MailAddr::Group(group) => group.addrs.clone(),
        })
        .map(|single| {
            let (mailbox, host) = single
                .addr
                .split_once('@')
                .unwrap_or((single.addr.as_str(), ""));
            Address {
                name: single.display_name.clone(),
                mailbox: mailbox.to_string(),
                host: host.to_string(),
            }
        })
        .collect()
}
