//! IMAP to ActiveSync sync core
//!
//! Detects what changed in an IMAP mailbox since a device's last sync
//! and renders messages into version-specific ActiveSync message
//! objects. The mail store is reached through the [`MailStore`] trait;
//! [`ImapStore`] implements it over STARTTLS with `async-imap`.
//!
//! A sync pass is [`SyncClient::detect`] followed by
//! [`SyncClient::messages`] for the added and changed UIDs, and
//! [`FolderCursor::acknowledge`] once the device has the result.

pub mod body;
pub mod builder;
mod category;
mod client;
mod config;
pub mod detect;
pub mod envelope;
mod error;
mod flag;
pub mod headers;
mod mailbox;
pub mod message;
pub mod mime;
pub mod store;
mod version;

pub use body::{BodyData, BodyPref, BodyPreferences, BodyRepresentation, BodyType, MimeSupport};
pub use builder::{AssembledMessage, Importance, MessageBuilder, MessageClass};
pub use category::{CategoryMap, category_atom};
pub use client::SyncClient;
pub use config::{ImapConfig, SyncConfig};
pub use detect::{ChangeDetector, ChangeSet, FlagDelta, FolderCursor, SyncOptions};
pub use error::{Error, Result, StoreError};
pub use flag::Flag;
pub use mailbox::Mailbox;
pub use message::{Attachment, AttachmentMethod, MessageAdapter};
pub use store::{ImapStore, MailStore, MailboxStatus, UidSet};
pub use version::ProtocolVersion;
