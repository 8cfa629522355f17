//! Mailbox identifiers
//!
//! A synced folder's `serverId` is its IMAP mailbox name. INBOX is
//! case-insensitive per RFC 3501 and gets its own variant so that
//! `inbox`, `Inbox` and `INBOX` compare equal; every other name is kept
//! verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An IMAP mailbox, as used for a folder cursor's server id.
///
/// # Examples
///
/// ```
/// use imap_activesync::Mailbox;
///
/// assert_eq!(Mailbox::from("inbox"), Mailbox::Inbox);
/// assert_eq!(Mailbox::from("Lists/rust").as_str(), "Lists/rust");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mailbox {
    /// The INBOX folder (RFC 3501 required, case-insensitive).
    #[default]
    Inbox,
    /// Any other mailbox, named as the server reports it.
    Named(String),
}

impl Mailbox {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    /// The IMAP mailbox name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => "INBOX",
            Self::Named(name) => name,
        }
    }

    /// Build an attachment file reference of the form `mailbox:uid:part`.
    #[must_use]
    pub fn file_reference(&self, uid: u32, mime_id: &str) -> String {
        format!("{}:{uid}:{mime_id}", self.as_str())
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Mailbox {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("inbox") {
            Self::Inbox
        } else {
            Self::Named(s.to_string())
        }
    }
}

impl From<String> for Mailbox {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("inbox") {
            Self::Inbox
        } else {
            Self::Named(s)
        }
    }
}

impl From<Mailbox> for String {
    fn from(mailbox: Mailbox) -> Self {
        match mailbox {
            Mailbox::Inbox => "INBOX".to_string(),
            Mailbox::Named(name) => name,
        }
    }
}
