//! Sync client: change detection, message assembly and flag updates
//! against one mail store session

use crate::body::{BodyPreferences, negotiate};
use crate::builder::{AssembledMessage, MessageBuilder};
use crate::category::{CategoryMap, category_atom};
use crate::config::{ImapConfig, SyncConfig};
use crate::detect::{ChangeDetector, ChangeSet, FolderCursor, SyncOptions};
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::mailbox::Mailbox;
use crate::message::{DecodedPart, MessageAdapter};
use crate::store::{FetchQuery, FetchResult, ImapStore, MailStore, MailboxStatus, SearchQuery, StoreRequest};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Sync client over a [`MailStore`]
pub struct SyncClient<S> {
    store: S,
    categories: CategoryMap,
}

impl SyncClient<ImapStore> {
    /// Connect to the IMAP server and log in
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the connection, TLS
    /// handshake or login fails.
    pub async fn connect(imap: &ImapConfig, sync: SyncConfig) -> Result<Self> {
        let store = ImapStore::connect(imap)
            .await
            .map_err(|source| Error::StoreUnavailable { op: "connect", source })?;
        Ok(Self::new(store, sync.categories))
    }

    /// Log out and close the session
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the server rejects the
    /// logout.
    pub async fn logout(self) -> Result<()> {
        self.store
            .logout()
            .await
            .map_err(|source| Error::StoreUnavailable { op: "logout", source })
    }
}

impl<S: MailStore> SyncClient<S> {
    #[must_use]
    pub const fn new(store: S, categories: CategoryMap) -> Self {
        Self { store, categories }
    }

    #[must_use]
    pub const fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    /// Current status of a mailbox
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderGone`] if the mailbox does not exist, or
    /// [`Error::StoreUnavailable`] if the status call fails.
    pub async fn status(&mut self, mailbox: &Mailbox) -> Result<MailboxStatus> {
        self.store
            .status(mailbox)
            .await
            .map_err(|e| Error::store("status", mailbox.as_str(), e))
    }

    /// Detect changes since `cursor`
    ///
    /// # Errors
    ///
    /// See [`ChangeDetector::detect`].
    pub async fn detect(
        &mut self,
        cursor: &FolderCursor,
        opts: &SyncOptions,
    ) -> Result<(ChangeSet, FolderCursor)> {
        ChangeDetector::new(&mut self.store, &self.categories)
            .detect(cursor, opts)
            .await
    }

    /// Cheap status-only check for changes since `cursor`
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderGone`] if the mailbox does not exist, or
    /// [`Error::StoreUnavailable`] if the status call fails.
    pub async fn ping(&mut self, cursor: &FolderCursor) -> Result<bool> {
        let status = self.status(&cursor.mailbox).await?;
        debug!(
            "Ping {}: uidnext {} -> {}, modseq {} -> {}, messages {} -> {}",
            cursor.mailbox,
            cursor.uid_next,
            status.uid_next,
            cursor.highest_mod_seq,
            status.highest_mod_seq,
            cursor.total_messages,
            status.messages
        );
        Ok((status.highest_mod_seq > 0
            && cursor.highest_mod_seq > 0
            && cursor.highest_mod_seq < status.highest_mod_seq)
            || cursor.uid_next < status.uid_next
            || cursor.total_messages != status.messages)
    }

    /// Assemble several messages with one batched fetch
    ///
    /// Messages that no longer exist are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderGone`] or [`Error::StoreUnavailable`] if
    /// the batch fetch fails, or any error from assembling a message
    /// other than [`Error::MessageGone`].
    pub async fn messages(
        &mut self,
        mailbox: &Mailbox,
        uids: &[u32],
        prefs: &BodyPreferences,
    ) -> Result<Vec<AssembledMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        info!("Fetching {} messages from {}", uids.len(), mailbox);
        let query = FetchQuery::uids(uids.iter().copied())
            .with_structure()
            .with_flags()
            .with_envelope()
            .with_header_text();
        let mut fetched = self.fetch(mailbox, &query).await?;

        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            let Some(result) = fetched.remove(uid) else {
                debug!("UID {} is gone from {}, skipping", uid, mailbox);
                continue;
            };
            match self.assemble(mailbox, result, prefs).await {
                Ok(message) => messages.push(message),
                Err(e) if e.is_message_gone() => {
                    warn!("UID {} vanished while being read, skipping", uid);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    /// Assemble a single message
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageGone`] if the UID does not exist, or a
    /// store error from the fetch.
    pub async fn message(
        &mut self,
        mailbox: &Mailbox,
        uid: u32,
        prefs: &BodyPreferences,
    ) -> Result<AssembledMessage> {
        let query = FetchQuery::uid(uid)
            .with_structure()
            .with_flags()
            .with_envelope()
            .with_header_text();
        let result = self
            .fetch(mailbox, &query)
            .await?
            .remove(&uid)
            .ok_or(Error::MessageGone(uid))?;
        self.assemble(mailbox, result, prefs).await
    }

    async fn assemble(
        &mut self,
        mailbox: &Mailbox,
        result: FetchResult,
        prefs: &BodyPreferences,
    ) -> Result<AssembledMessage> {
        let builder = MessageBuilder::new(prefs.version, &self.categories);
        let mut adapter = MessageAdapter::from_fetch(&mut self.store, mailbox.clone(), result)?;
        let body = negotiate(&mut adapter, prefs).await?;
        builder.build(&mut adapter, &body, prefs).await
    }

    /// Find the UID of a message by its `Message-ID`
    ///
    /// Only messages the device knows about and has not been told were
    /// removed are searched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no message matches, or a store
    /// error from the search.
    pub async fn uid_from_message_id(&mut self, cursor: &FolderCursor, message_id: &str) -> Result<u32> {
        let universe = cursor
            .known_uids
            .difference(&cursor.removed_uids)
            .copied()
            .collect();
        let query = SearchQuery::all().within(universe).header("Message-ID", message_id);
        if query.matches_nothing() {
            return Err(Error::NotFound(format!("Message-ID {message_id}")));
        }
        let result = self
            .store
            .search(&cursor.mailbox, &query)
            .await
            .map_err(|e| Error::store("search", cursor.mailbox.as_str(), e))?;
        result
            .matched
            .first()
            .copied()
            .ok_or_else(|| Error::NotFound(format!("Message-ID {message_id}")))
    }

    /// Decoded contents of one MIME part
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageGone`] if the UID does not exist,
    /// [`Error::NotFound`] if the part does not, or a store error from
    /// the fetch.
    pub async fn attachment(&mut self, mailbox: &Mailbox, uid: u32, mime_id: &str) -> Result<DecodedPart> {
        let result = self
            .fetch(mailbox, &FetchQuery::uid(uid).with_structure().with_flags())
            .await?
            .remove(&uid)
            .ok_or(Error::MessageGone(uid))?;
        let mut adapter = MessageAdapter::from_fetch(&mut self.store, mailbox.clone(), result)?;
        adapter.mime_part(mime_id).await
    }

    /// Set or clear `\Seen`
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn set_read(&mut self, mailbox: &Mailbox, uid: u32, read: bool) -> Result<()> {
        let request = if read {
            StoreRequest::new([uid]).add(Flag::Seen)
        } else {
            StoreRequest::new([uid]).remove(Flag::Seen)
        };
        self.update(mailbox, &request).await
    }

    /// Follow-up flags map to `\Flagged`; anything but an active flag
    /// clears it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn set_flagged(&mut self, mailbox: &Mailbox, uid: u32, active: bool) -> Result<()> {
        let request = if active {
            StoreRequest::new([uid]).add(Flag::Flagged)
        } else {
            StoreRequest::new([uid]).remove(Flag::Flagged)
        };
        self.update(mailbox, &request).await
    }

    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn mark_replied(&mut self, mailbox: &Mailbox, uid: u32) -> Result<()> {
        self.update(mailbox, &StoreRequest::new([uid]).add(Flag::Answered))
            .await
    }

    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn mark_forwarded(&mut self, mailbox: &Mailbox, uid: u32) -> Result<()> {
        self.update(mailbox, &StoreRequest::new([uid]).add(Flag::Forwarded))
            .await
    }

    /// Replace a message's category flags
    ///
    /// Each category is turned into an IMAP atom; atoms present in the
    /// category table are set and every other table flag is cleared.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn categories_to_flags(
        &mut self,
        mailbox: &Mailbox,
        uid: u32,
        categories: &[String],
    ) -> Result<()> {
        let request = self.category_request(uid, categories);
        if request.add.is_empty() && request.remove.is_empty() {
            return Ok(());
        }
        self.update(mailbox, &request).await
    }

    fn category_request(&self, uid: u32, categories: &[String]) -> StoreRequest {
        let mut table: BTreeMap<&str, bool> = self.categories.flags().map(|f| (f, false)).collect();
        for category in categories {
            let atom = category_atom(category);
            if let Some(wanted) = table.get_mut(atom.as_str()) {
                *wanted = true;
            }
        }
        table
            .into_iter()
            .fold(StoreRequest::new([uid]), |request, (flag, wanted)| {
                if wanted {
                    request.add(Flag::from(flag))
                } else {
                    request.remove(Flag::from(flag))
                }
            })
    }

    async fn update(&mut self, mailbox: &Mailbox, request: &StoreRequest) -> Result<()> {
        debug!("Updating flags in {}: {:?}", mailbox, request.to_imap());
        self.store
            .store(mailbox, request)
            .await
            .map_err(|e| Error::store("store", mailbox.as_str(), e))
    }

    async fn fetch(&mut self, mailbox: &Mailbox, query: &FetchQuery) -> Result<BTreeMap<u32, FetchResult>> {
        self.store
            .fetch(mailbox, query)
            .await
            .map_err(|e| Error::store("fetch", mailbox.as_str(), e))
    }
}
