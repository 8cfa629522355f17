//! Test data model for the fake mail store
//!
//! Provides a builder-style API for constructing folder state:
//!
//! ```ignore
//! let folders = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .condstore()
//!         .message(1, date(2024, 3, 1), &[Flag::Seen], raw_rfc2822_bytes)
//!         .message(2, date(2024, 3, 2), &[], raw_rfc2822_bytes)
//!     .folder("Sent")
//!         .message(10, date(2024, 1, 5), &[Flag::Seen], raw_rfc2822_bytes)
//!     .build();
//! ```
//!
//! Messages are kept as raw RFC 5322 bytes and parsed with `mailparse`
//! when the store is asked for structure or sections.

use chrono::NaiveDate;
use imap_activesync::Flag;
use std::collections::BTreeMap;

/// A single folder with the counters `STATUS` reports.
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub uid_validity: u32,
    pub uid_next: u32,
    /// Zero when the folder behaves like a store without CONDSTORE.
    pub highest_mod_seq: u64,
    pub messages: BTreeMap<u32, TestMessage>,
    /// Expunged UIDs and the MODSEQ of the expunge.
    pub expunged: BTreeMap<u32, u64>,
}

impl Folder {
    pub const fn condstore(&self) -> bool {
        self.highest_mod_seq > 0
    }

    /// Bump the folder MODSEQ and return the new value, or zero without
    /// CONDSTORE.
    pub fn next_mod_seq(&mut self) -> u64 {
        if self.condstore() {
            self.highest_mod_seq += 1;
        }
        self.highest_mod_seq
    }

    pub fn insert(&mut self, mut message: TestMessage) {
        message.modseq = self.next_mod_seq();
        self.uid_next = self.uid_next.max(message.uid + 1);
        self.messages.insert(message.uid, message);
    }

    pub fn set_flags(&mut self, uid: u32, flags: &[Flag]) {
        let modseq = self.next_mod_seq();
        if let Some(message) = self.messages.get_mut(&uid) {
            message.flags = flags.to_vec();
            message.modseq = modseq;
        }
    }

    pub fn expunge(&mut self, uid: u32) {
        let modseq = self.next_mod_seq();
        if self.messages.remove(&uid).is_some() {
            self.expunged.insert(uid, modseq);
        }
    }
}

/// A test message stored in a folder.
///
/// - `internal_date`: what `SINCE`/`BEFORE` searches compare against.
/// - `modseq`: assigned by the folder on insert and on every flag change.
/// - `raw`: the complete message as returned by `BODY[]`.
#[derive(Debug, Clone)]
pub struct TestMessage {
    pub uid: u32,
    pub internal_date: NaiveDate,
    pub flags: Vec<Flag>,
    pub modseq: u64,
    pub raw: Vec<u8>,
}

/// Builder for constructing folders step by step.
///
/// Call `.folder(name)` to start a new folder, then chain `.message(..)`
/// calls to add messages to it. Finish with `.build()`.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub const fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder without CONDSTORE. Subsequent calls configure and
    /// fill this folder.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            uid_validity: 1,
            uid_next: 1,
            highest_mod_seq: 0,
            messages: BTreeMap::new(),
            expunged: BTreeMap::new(),
        });
        self
    }

    /// Give the current folder CONDSTORE, starting its MODSEQ at 1.
    pub fn condstore(mut self) -> Self {
        let folder = self.current();
        folder.highest_mod_seq = folder.highest_mod_seq.max(1);
        self
    }

    pub fn uid_validity(mut self, value: u32) -> Self {
        self.current().uid_validity = value;
        self
    }

    /// Add a message to the most recently added folder.
    pub fn message(mut self, uid: u32, internal_date: NaiveDate, flags: &[Flag], raw: &[u8]) -> Self {
        self.current().insert(TestMessage {
            uid,
            internal_date,
            flags: flags.to_vec(),
            modseq: 0,
            raw: raw.to_vec(),
        });
        self
    }

    pub fn build(self) -> BTreeMap<String, Folder> {
        self.folders
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect()
    }

    fn current(&mut self) -> &mut Folder {
        self.folders
            .last_mut()
            .expect("call .folder() before configuring it")
    }
}
