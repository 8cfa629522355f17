//! Change detection
//!
//! [`ChangeDetector::detect`] compares a [`FolderCursor`] with the live
//! mailbox status and picks one strategy:
//!
//! - initial sync, for a cursor that has never synced
//! - no-MODSEQ poll, for stores without CONDSTORE
//! - MODSEQ incremental, when the store's modseq moved or a window pass
//!   was requested
//!
//! A cursor recorded without MODSEQ against a store that now has it is
//! stale and must be rebuilt. This assumes a store does not lose and
//! regain CONDSTORE for the same mailbox.

mod window;

pub use window::{FilterWindowQuery, WindowMode};

use crate::category::CategoryMap;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::mailbox::Mailbox;
use crate::store::{FetchIds, FetchQuery, FetchResult, MailStore, MailboxStatus, SearchQuery, UidSet};
use crate::version::ProtocolVersion;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Read/flagged state last sent to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagState {
    pub read: bool,
    pub flagged: bool,
}

/// Persisted per-folder, per-device sync state.
///
/// `removed_uids` and `soft_deleted_uids` hold what the last pass
/// reported and are folded into `known_uids` by
/// [`FolderCursor::acknowledge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderCursor {
    pub mailbox: Mailbox,
    /// Zero until the first sync.
    pub uid_next: u32,
    /// Zero when the store had no MODSEQ support.
    pub highest_mod_seq: u64,
    pub uid_validity: u32,
    pub known_uids: UidSet,
    /// Only kept for stores without MODSEQ.
    #[serde(default)]
    pub known_flags: BTreeMap<u32, FlagState>,
    pub removed_uids: UidSet,
    pub soft_deleted_uids: UidSet,
    pub window_start: Option<NaiveDate>,
    /// When the window was last checked.
    pub window_end: Option<DateTime<Utc>>,
    pub total_messages: u32,
}

impl FolderCursor {
    #[must_use]
    pub fn new(mailbox: Mailbox) -> Self {
        Self {
            mailbox,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_initial(&self) -> bool {
        self.uid_next == 0
    }

    /// UIDs on the device that the last pass did not report as gone.
    #[must_use]
    pub fn live_uids(&self) -> UidSet {
        self.known_uids
            .iter()
            .filter(|uid| !self.removed_uids.contains(uid) && !self.soft_deleted_uids.contains(uid))
            .copied()
            .collect()
    }

    /// Record that the device applied `changes`.
    ///
    /// Added UIDs join the known set, removed and soft-deleted UIDs leave
    /// it, and the pending removal sets are cleared.
    pub fn acknowledge(&mut self, changes: &ChangeSet) {
        self.known_uids.extend(changes.added.iter().copied());
        if self.highest_mod_seq == 0 {
            for (uid, delta) in &changes.flag_deltas {
                self.known_flags.insert(
                    *uid,
                    FlagState {
                        read: delta.read,
                        flagged: delta.flagged.unwrap_or_default(),
                    },
                );
            }
        }
        for uid in changes.removed.iter().chain(&changes.soft_deleted) {
            self.known_uids.remove(uid);
            self.known_flags.remove(uid);
        }
        self.removed_uids.clear();
        self.soft_deleted_uids.clear();
    }

    fn apply_status(&mut self, status: &MailboxStatus) {
        self.uid_next = status.uid_next;
        self.highest_mod_seq = status.highest_mod_seq;
        self.uid_validity = status.uid_validity;
        self.total_messages = status.messages;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub version: ProtocolVersion,
    /// Start of the device's filter window.
    pub since_date: Option<NaiveDate>,
    pub soft_delete: bool,
    /// Force a window pass even if the window did not move.
    pub refresh_filter: bool,
}

impl SyncOptions {
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn since(mut self, date: NaiveDate) -> Self {
        self.since_date = Some(date);
        self
    }

    #[must_use]
    pub const fn with_soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    #[must_use]
    pub const fn with_refresh_filter(mut self) -> Self {
        self.refresh_filter = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDelta {
    pub read: bool,
    /// Absent for 2.5 clients.
    pub flagged: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<u32>,
    pub flag_deltas: BTreeMap<u32, FlagDelta>,
    pub category_deltas: BTreeMap<u32, Vec<String>>,
    pub removed: UidSet,
    pub soft_deleted: UidSet,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.flag_deltas.is_empty()
            && self.category_deltas.is_empty()
            && self.removed.is_empty()
            && self.soft_deleted.is_empty()
    }

    /// UIDs reported with new flags that are not new messages.
    pub fn changed(&self) -> impl Iterator<Item = u32> + '_ {
        self.flag_deltas
            .keys()
            .chain(self.category_deltas.keys())
            .copied()
            .filter(|uid| !self.added.contains(uid))
            .collect::<UidSet>()
            .into_iter()
    }

    fn record_flags(&mut self, uid: u32, flags: &[Flag], opts: &SyncOptions, categories: &CategoryMap) {
        self.flag_deltas.insert(uid, flag_delta(flags, opts.version));
        if opts.version.supports_categories() {
            self.category_deltas.insert(uid, categories.categories(flags));
        }
    }

    fn forget(&mut self, uids: &UidSet) {
        self.added.retain(|uid| !uids.contains(uid));
        self.flag_deltas.retain(|uid, _| !uids.contains(uid));
        self.category_deltas.retain(|uid, _| !uids.contains(uid));
    }
}

fn flag_delta(flags: &[Flag], version: ProtocolVersion) -> FlagDelta {
    FlagDelta {
        read: flags.contains(&Flag::Seen),
        flagged: (!version.is_legacy()).then(|| flags.contains(&Flag::Flagged)),
    }
}

/// Runs detection passes against one store session.
pub struct ChangeDetector<'s, S> {
    store: &'s mut S,
    categories: &'s CategoryMap,
}

impl<'s, S: MailStore> ChangeDetector<'s, S> {
    pub fn new(store: &'s mut S, categories: &'s CategoryMap) -> Self {
        Self { store, categories }
    }

    /// Detect what changed in `cursor`'s mailbox since the last pass.
    ///
    /// On success returns the change set and the cursor to persist; on
    /// failure nothing about `cursor` has changed.
    ///
    /// # Errors
    ///
    /// - [`Error::FolderGone`] if the mailbox status cannot be read.
    /// - [`Error::StaleState`] on a UIDVALIDITY change, a cursor modseq
    ///   ahead of the store, or a store that gained MODSEQ support after
    ///   the cursor was created.
    /// - [`Error::StoreUnavailable`] if a search or fetch fails.
    pub async fn detect(
        &mut self,
        cursor: &FolderCursor,
        opts: &SyncOptions,
    ) -> Result<(ChangeSet, FolderCursor)> {
        let mailbox = &cursor.mailbox;
        let status = self.store.status(mailbox).await.map_err(|e| {
            warn!("Status of {} failed, treating it as gone: {}", mailbox, e);
            Error::FolderGone(mailbox.to_string())
        })?;
        info!(
            "{}: status messages={} uidnext={} modseq={} uidvalidity={}",
            mailbox, status.messages, status.uid_next, status.highest_mod_seq, status.uid_validity
        );

        let mut updated = cursor.clone();
        let changes = if cursor.is_initial() {
            debug!("{}: initial sync", mailbox);
            self.initial(cursor, &status, opts, &mut updated).await?
        } else {
            check_validity(cursor, &status)?;
            if status.highest_mod_seq == 0 {
                debug!("{}: polling without MODSEQ", mailbox);
                self.poll(cursor, opts, &mut updated).await?
            } else if cursor.highest_mod_seq == 0 {
                return Err(Error::StaleState(format!(
                    "{mailbox} gained MODSEQ support after the cursor was created"
                )));
            } else if needs_modseq_pass(cursor, &status, opts) {
                debug!(
                    "{}: MODSEQ pass from {} to {}",
                    mailbox, cursor.highest_mod_seq, status.highest_mod_seq
                );
                self.incremental(cursor, &status, opts, &mut updated).await?
            } else {
                debug!("{}: no changes", mailbox);
                ChangeSet::default()
            }
        };

        updated.apply_status(&status);
        updated.removed_uids.clone_from(&changes.removed);
        updated.soft_deleted_uids.clone_from(&changes.soft_deleted);
        info!(
            "{}: {} added, {} changed, {} removed, {} soft deleted",
            mailbox,
            changes.added.len(),
            changes.changed().count(),
            changes.removed.len(),
            changes.soft_deleted.len()
        );
        Ok((changes, updated))
    }

    async fn initial(
        &mut self,
        cursor: &FolderCursor,
        status: &MailboxStatus,
        opts: &SyncOptions,
        updated: &mut FolderCursor,
    ) -> Result<ChangeSet> {
        let mailbox = &cursor.mailbox;
        let query = opts
            .since_date
            .map_or_else(SearchQuery::all, |d| SearchQuery::all().since(d));
        let matched = self.search(mailbox, &query).await?;
        let mut changes = ChangeSet {
            added: matched.iter().copied().collect(),
            ..ChangeSet::default()
        };
        // With MODSEQ the full message is fetched downstream anyway.
        if status.highest_mod_seq == 0 && !matched.is_empty() {
            let fetched = self.fetch(mailbox, &FetchQuery::uids(matched).with_flags()).await?;
            for (uid, result) in &fetched {
                changes.record_flags(*uid, &result.flags, opts, self.categories);
            }
        }
        updated.window_start = opts.since_date;
        Ok(changes)
    }

    async fn poll(
        &mut self,
        cursor: &FolderCursor,
        opts: &SyncOptions,
        updated: &mut FolderCursor,
    ) -> Result<ChangeSet> {
        let mailbox = &cursor.mailbox;
        let query = opts
            .since_date
            .map_or_else(SearchQuery::all, |d| SearchQuery::all().since(d));
        let matched = self.search(mailbox, &query).await?;
        let fetched = if matched.is_empty() {
            BTreeMap::new()
        } else {
            self.fetch(mailbox, &FetchQuery::uids(matched.iter().copied()).with_flags())
                .await?
        };

        let mut changes = ChangeSet::default();
        for (uid, result) in &fetched {
            if cursor.known_uids.contains(uid) {
                let state = FlagState {
                    read: result.has_flag(&Flag::Seen),
                    flagged: result.has_flag(&Flag::Flagged),
                };
                let previous = cursor.known_flags.get(uid).copied().unwrap_or_default();
                if !cursor.known_flags.contains_key(uid) || state_changed(previous, state, opts) {
                    changes.record_flags(*uid, &result.flags, opts, self.categories);
                }
            } else {
                changes.added.push(*uid);
                changes.record_flags(*uid, &result.flags, opts, self.categories);
            }
        }

        if let Some(since) = opts.since_date.filter(|_| window_pass(cursor, opts)) {
            changes.soft_deleted = self.soft_deleted(cursor, since).await?;
            updated.window_start = Some(since);
            updated.window_end = Some(Utc::now());
        }
        changes.removed = cursor
            .known_uids
            .iter()
            .filter(|uid| !matched.contains(uid) && !changes.soft_deleted.contains(uid))
            .copied()
            .collect();
        let gone = &changes.removed | &changes.soft_deleted;
        changes.forget(&gone);
        Ok(changes)
    }

    async fn incremental(
        &mut self,
        cursor: &FolderCursor,
        status: &MailboxStatus,
        opts: &SyncOptions,
        updated: &mut FolderCursor,
    ) -> Result<ChangeSet> {
        let mailbox = &cursor.mailbox;
        let mut changes = ChangeSet::default();

        if status.highest_mod_seq > cursor.highest_mod_seq {
            let query = FetchQuery::new(FetchIds::All)
                .with_flags()
                .with_header_text()
                .changed_since(cursor.highest_mod_seq);
            let fetched = self.fetch(mailbox, &query).await?;
            for (uid, result) in &fetched {
                let modseq = result.modseq.unwrap_or_default();
                if modseq > status.highest_mod_seq {
                    debug!(
                        "{}: UID {} has MODSEQ {} past snapshot {}, leaving it for the next pass",
                        mailbox, uid, modseq, status.highest_mod_seq
                    );
                    continue;
                }
                if outside_window(result, opts.since_date) {
                    debug!("{}: UID {} is older than the filter window", mailbox, uid);
                    continue;
                }
                if !cursor.known_uids.contains(uid) {
                    changes.added.push(*uid);
                }
                changes.record_flags(*uid, &result.flags, opts, self.categories);
            }
        }

        let window = window_pass(cursor, opts);
        if let Some(since) = opts.since_date.filter(|_| window) {
            let widened = FilterWindowQuery::excluding(since, WindowMode::Since, cursor.known_uids.clone())
                .run(&mut *self.store, mailbox)
                .await?;
            let widened: UidSet = widened
                .into_iter()
                .filter(|uid| *uid < status.uid_next && !changes.added.contains(uid))
                .collect();
            if !widened.is_empty() {
                debug!("{}: {} messages entered the filter window", mailbox, widened.len());
                let fetched = self.fetch(mailbox, &FetchQuery::uids(widened).with_flags()).await?;
                for (uid, result) in &fetched {
                    changes.added.push(*uid);
                    changes.record_flags(*uid, &result.flags, opts, self.categories);
                }
            }
        }

        if !cursor.known_uids.is_empty() {
            changes.removed = self
                .store
                .vanished(mailbox, cursor.highest_mod_seq, &cursor.known_uids)
                .await
                .map_err(|e| Error::store("vanished", mailbox.as_str(), e))?;
        }

        if let Some(since) = opts.since_date.filter(|_| window) {
            changes.soft_deleted = self.soft_deleted(cursor, since).await?;
            changes.soft_deleted.retain(|uid| !changes.removed.contains(uid));
            updated.window_start = Some(since);
            updated.window_end = Some(Utc::now());
        }

        let gone = &changes.removed | &changes.soft_deleted;
        changes.forget(&gone);
        changes.added.sort_unstable();
        Ok(changes)
    }

    async fn soft_deleted(&mut self, cursor: &FolderCursor, since: NaiveDate) -> Result<UidSet> {
        let candidates = cursor.live_uids();
        info!(
            "{}: checking {} messages for soft delete before {}",
            cursor.mailbox,
            candidates.len(),
            since
        );
        FilterWindowQuery::within(since, WindowMode::Before, candidates)
            .run(&mut *self.store, &cursor.mailbox)
            .await
    }

    async fn search(&mut self, mailbox: &Mailbox, query: &SearchQuery) -> Result<UidSet> {
        self.store
            .search(mailbox, query)
            .await
            .map(|r| r.matched)
            .map_err(|e| Error::store("search", mailbox.as_str(), e))
    }

    async fn fetch(
        &mut self,
        mailbox: &Mailbox,
        query: &FetchQuery,
    ) -> Result<BTreeMap<u32, FetchResult>> {
        self.store
            .fetch(mailbox, query)
            .await
            .map_err(|e| Error::store("fetch", mailbox.as_str(), e))
    }

    /// Fold an acknowledged change set into `cursor`.
    ///
    /// See [`FolderCursor::acknowledge`].
    pub fn acknowledge(&self, cursor: &mut FolderCursor, changes: &ChangeSet) {
        cursor.acknowledge(changes);
    }
}

fn check_validity(cursor: &FolderCursor, status: &MailboxStatus) -> Result<()> {
    if cursor.uid_validity != 0 && cursor.uid_validity != status.uid_validity {
        return Err(Error::StaleState(format!(
            "UIDVALIDITY of {} changed from {} to {}",
            cursor.mailbox, cursor.uid_validity, status.uid_validity
        )));
    }
    if status.highest_mod_seq > 0 && cursor.highest_mod_seq > status.highest_mod_seq {
        return Err(Error::StaleState(format!(
            "cursor MODSEQ {} is ahead of {} at {}",
            cursor.highest_mod_seq, cursor.mailbox, status.highest_mod_seq
        )));
    }
    Ok(())
}

fn needs_modseq_pass(cursor: &FolderCursor, status: &MailboxStatus, opts: &SyncOptions) -> bool {
    status.highest_mod_seq > cursor.highest_mod_seq || opts.soft_delete || window_pass(cursor, opts)
}

/// Soft delete and window widening run on request and whenever the
/// window start moved.
fn window_pass(cursor: &FolderCursor, opts: &SyncOptions) -> bool {
    opts.since_date.is_some()
        && (opts.soft_delete || opts.refresh_filter || opts.since_date != cursor.window_start)
}

fn state_changed(previous: FlagState, current: FlagState, opts: &SyncOptions) -> bool {
    previous.read != current.read || (!opts.version.is_legacy() && previous.flagged != current.flagged)
}

fn outside_window(result: &FetchResult, since: Option<NaiveDate>) -> bool {
    let Some(since) = since else {
        return false;
    };
    result
        .header_text()
        .and_then(|h| h.date())
        .is_some_and(|date| date.date_naive() < since)
}
