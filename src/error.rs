//! Error types for imap-activesync
//!
//! Two layers: [`StoreError`] is what a [`crate::MailStore`] reports,
//! [`Error`] is the taxonomy the sync core hands to its caller.

use thiserror::Error;

/// Failure reported by a mail store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("mailbox does not exist: {0}")]
    NoSuchMailbox(String),

    #[error("IMAP error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    /// The mailbox no longer exists; the caller must discard its cursor.
    #[error("folder gone: {0}")]
    FolderGone(String),

    /// The cursor no longer matches the store's capabilities or identity;
    /// the caller must rebuild it from scratch.
    #[error("stale sync state: {0}")]
    StaleState(String),

    #[error("mail store unavailable during {op}: {source}")]
    StoreUnavailable {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// A UID vanished between search and fetch.
    #[error("message {0} no longer exists")]
    MessageGone(u32),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a store failure raised by `op` against `mailbox`.
    ///
    /// A missing mailbox is always reported as [`Error::FolderGone`],
    /// whichever operation noticed it.
    #[must_use]
    pub fn store(op: &'static str, mailbox: &str, source: StoreError) -> Self {
        match source {
            StoreError::NoSuchMailbox(_) => Self::FolderGone(mailbox.to_string()),
            source => Self::StoreUnavailable { op, source },
        }
    }

    /// Whether the caller has to treat the folder as needing a fresh
    /// baseline instead of an empty change set.
    #[must_use]
    pub const fn requires_resync(&self) -> bool {
        matches!(self, Self::FolderGone(_) | Self::StaleState(_))
    }

    #[must_use]
    pub const fn is_message_gone(&self) -> bool {
        matches!(self, Self::MessageGone(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
