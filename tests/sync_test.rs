//! Change detection against the in-memory store.
//!
//! Each test builds folders with [`MailboxBuilder`], wraps them in a
//! [`FakeStore`] and drives [`SyncClient::detect`] through one or more
//! passes, acknowledging in between the way a device would.

mod fake_store;

use chrono::NaiveDate;
use fake_store::{FakeStore, MailboxBuilder};
use imap_activesync::{
    CategoryMap, ChangeSet, Error, Flag, FolderCursor, Mailbox, ProtocolVersion, SyncClient,
    SyncOptions, UidSet,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn raw(subject: &str, message_id: &str) -> Vec<u8> {
    format!(
        "From: alice@example.com\r\n\
         To: bob@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 04 Mar 2024 12:00:00 +0000\r\n\
         Message-ID: {message_id}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Body of {subject}\r\n"
    )
    .into_bytes()
}

fn uids(list: &[u32]) -> UidSet {
    list.iter().copied().collect()
}

/// Three messages in INBOX, spread over two months.
fn three_messages(condstore: bool) -> MailboxBuilder {
    let builder = MailboxBuilder::new().folder("INBOX");
    let builder = if condstore { builder.condstore() } else { builder };
    builder
        .message(1, date(2024, 1, 10), &[Flag::Seen], &raw("one", "<one@test>"))
        .message(2, date(2024, 3, 1), &[], &raw("two", "<two@test>"))
        .message(3, date(2024, 3, 10), &[], &raw("three", "<three@test>"))
}

fn client(builder: MailboxBuilder) -> SyncClient<FakeStore> {
    SyncClient::new(FakeStore::new(builder.build()), CategoryMap::new())
}

/// Run a first pass and acknowledge it.
async fn synced(client: &mut SyncClient<FakeStore>, opts: &SyncOptions) -> FolderCursor {
    let (changes, mut cursor) = client
        .detect(&FolderCursor::new(Mailbox::Inbox), opts)
        .await
        .unwrap();
    cursor.acknowledge(&changes);
    client.store_mut().clear_log();
    cursor
}

fn assert_disjoint(changes: &ChangeSet, before: &FolderCursor) {
    assert!(changes.added.iter().all(|uid| !changes.removed.contains(uid)));
    assert!(changes.soft_deleted.is_subset(&before.known_uids));
}

// ── Initial sync ──────────────────────────────────────────────────

#[tokio::test]
async fn initial_sync_without_modseq_fetches_flags() {
    let mut client = client(three_messages(false));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = FolderCursor::new(Mailbox::Inbox);

    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();

    assert_eq!(changes.added, vec![1, 2, 3]);
    assert_eq!(changes.flag_deltas.len(), 3);
    assert!(changes.flag_deltas[&1].read);
    assert_eq!(changes.flag_deltas[&2].flagged, Some(false));
    assert!(changes.removed.is_empty());
    assert_eq!(updated.uid_next, 4);
    assert_eq!(updated.total_messages, 3);
    assert_eq!(updated.highest_mod_seq, 0);
    assert_eq!(client.store_mut().calls(), ["status", "search", "fetch"]);
}

#[tokio::test]
async fn initial_sync_with_modseq_returns_bare_uids() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);

    let (changes, updated) = client
        .detect(&FolderCursor::new(Mailbox::Inbox), &opts)
        .await
        .unwrap();

    assert_eq!(changes.added, vec![1, 2, 3]);
    assert!(changes.flag_deltas.is_empty());
    assert!(updated.highest_mod_seq > 0);
    assert_eq!(client.store_mut().calls(), ["status", "search"]);
}

#[tokio::test]
async fn initial_sync_honors_filter_window() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1).since(date(2024, 2, 1));

    let (changes, updated) = client
        .detect(&FolderCursor::new(Mailbox::Inbox), &opts)
        .await
        .unwrap();

    assert_eq!(changes.added, vec![2, 3]);
    assert_eq!(updated.window_start, Some(date(2024, 2, 1)));
}

#[tokio::test]
async fn initial_sync_never_asks_for_vanished() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1)
        .since(date(2024, 2, 1))
        .with_soft_delete();

    let (changes, _) = client
        .detect(&FolderCursor::new(Mailbox::Inbox), &opts)
        .await
        .unwrap();

    assert!(changes.removed.is_empty());
    assert!(changes.soft_deleted.is_empty());
    assert!(!client.store_mut().calls().contains(&"vanished"));
}

// ── MODSEQ incremental ────────────────────────────────────────────

#[tokio::test]
async fn modseq_change_within_snapshot_is_reported() {
    let mut client = client(three_messages(true));
    {
        let folder = client.store_mut().folder_mut("INBOX");
        folder.highest_mod_seq = 12;
        folder.messages.get_mut(&1).unwrap().modseq = 10;
        folder.messages.get_mut(&2).unwrap().modseq = 4;
        folder.messages.get_mut(&3).unwrap().modseq = 5;
    }
    let cursor = FolderCursor {
        uid_next: 4,
        highest_mod_seq: 5,
        uid_validity: 1,
        known_uids: uids(&[1, 2, 3]),
        total_messages: 3,
        ..FolderCursor::new(Mailbox::Inbox)
    };

    let (changes, updated) = client
        .detect(&cursor, &SyncOptions::new(ProtocolVersion::V14_1))
        .await
        .unwrap();

    assert!(changes.added.is_empty());
    assert_eq!(changes.changed().collect::<Vec<_>>(), vec![1]);
    assert!(changes.flag_deltas[&1].read);
    assert_eq!(updated.highest_mod_seq, 12);
    assert_disjoint(&changes, &cursor);
}

#[tokio::test]
async fn changes_past_the_snapshot_wait_for_the_next_pass() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;

    client.store_mut().folder_mut("INBOX").set_flags(1, &[]);
    let snapshot = client.store_mut().folder_mut("INBOX").highest_mod_seq;
    client
        .store_mut()
        .after_status("INBOX", |folder| folder.set_flags(2, &[Flag::Flagged]));

    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();
    assert_eq!(changes.changed().collect::<Vec<_>>(), vec![1]);
    assert!(!changes.flag_deltas.contains_key(&2));
    assert_eq!(updated.highest_mod_seq, snapshot);

    let mut cursor = updated;
    cursor.acknowledge(&changes);
    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();
    assert_eq!(changes.changed().collect::<Vec<_>>(), vec![2]);
    assert_eq!(changes.flag_deltas[&2].flagged, Some(true));
    assert_eq!(updated.highest_mod_seq, snapshot + 1);
}

#[tokio::test]
async fn new_and_expunged_messages_with_modseq() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;

    {
        let folder = client.store_mut().folder_mut("INBOX");
        folder.expunge(2);
        folder.insert(fake_store::TestMessage {
            uid: 4,
            internal_date: date(2024, 3, 12),
            flags: vec![],
            modseq: 0,
            raw: raw("four", "<four@test>"),
        });
    }

    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();
    assert_eq!(changes.added, vec![4]);
    assert_eq!(changes.removed, uids(&[2]));
    assert_eq!(updated.uid_next, 5);
    assert_eq!(updated.removed_uids, uids(&[2]));
    assert_disjoint(&changes, &cursor);

    let mut cursor = updated;
    cursor.acknowledge(&changes);
    assert_eq!(cursor.known_uids, uids(&[1, 3, 4]));
    assert!(cursor.removed_uids.is_empty());
}

#[tokio::test]
async fn unchanged_folder_needs_only_status() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;

    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();
    assert!(changes.is_empty());
    assert_eq!(updated, cursor);
    assert_eq!(client.store_mut().calls(), ["status"]);
}

#[tokio::test]
async fn categories_follow_flags_on_newer_versions() {
    let folders = MailboxBuilder::new()
        .folder("INBOX")
        .message(1, date(2024, 3, 1), &[Flag::from("$work")], &raw("one", "<one@test>"))
        .build();
    let categories = CategoryMap::new().with("$work", "Work");

    let mut client = SyncClient::new(FakeStore::new(folders.clone()), categories.clone());
    let (changes, _) = client
        .detect(
            &FolderCursor::new(Mailbox::Inbox),
            &SyncOptions::new(ProtocolVersion::V14_0),
        )
        .await
        .unwrap();
    assert_eq!(changes.category_deltas[&1], vec!["Work"]);

    let mut client = SyncClient::new(FakeStore::new(folders), categories);
    let (changes, _) = client
        .detect(
            &FolderCursor::new(Mailbox::Inbox),
            &SyncOptions::new(ProtocolVersion::V12_1),
        )
        .await
        .unwrap();
    assert!(changes.category_deltas.is_empty());
}

// ── Filter window ─────────────────────────────────────────────────

#[tokio::test]
async fn soft_delete_reports_messages_leaving_the_window() {
    let mut client = client(three_messages(true));
    let cursor = synced(&mut client, &SyncOptions::new(ProtocolVersion::V14_1)).await;

    let opts = SyncOptions::new(ProtocolVersion::V14_1)
        .since(date(2024, 2, 1))
        .with_soft_delete();
    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();

    assert_eq!(changes.soft_deleted, uids(&[1]));
    assert!(changes.removed.is_empty());
    assert!(changes.added.is_empty());
    assert_eq!(updated.window_start, Some(date(2024, 2, 1)));
    assert!(updated.window_end.is_some());
    assert_disjoint(&changes, &cursor);

    let mut cursor = updated;
    cursor.acknowledge(&changes);
    assert_eq!(cursor.known_uids, uids(&[2, 3]));
}

#[tokio::test]
async fn soft_delete_reruns_even_when_the_window_is_unchanged() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1)
        .since(date(2024, 2, 1))
        .with_soft_delete();
    let cursor = synced(&mut client, &opts).await;

    client.store_mut().folder_mut("INBOX").messages.get_mut(&2).unwrap().internal_date =
        date(2024, 1, 20);
    let (changes, _) = client.detect(&cursor, &opts).await.unwrap();

    assert_eq!(changes.soft_deleted, uids(&[2]));
    assert!(client.store_mut().calls().contains(&"search"));
}

#[tokio::test]
async fn widening_the_window_adds_older_messages() {
    let mut client = client(three_messages(true));
    let cursor = synced(
        &mut client,
        &SyncOptions::new(ProtocolVersion::V14_1).since(date(2024, 3, 1)),
    )
    .await;
    assert_eq!(cursor.known_uids, uids(&[2, 3]));

    let opts = SyncOptions::new(ProtocolVersion::V14_1).since(date(2024, 1, 1));
    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();

    assert_eq!(changes.added, vec![1]);
    assert!(changes.flag_deltas[&1].read);
    assert!(changes.soft_deleted.is_empty());
    assert_eq!(updated.window_start, Some(date(2024, 1, 1)));
}

// ── No-MODSEQ poll ────────────────────────────────────────────────

#[tokio::test]
async fn poll_reports_only_real_flag_changes() {
    let mut client = client(three_messages(false));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;
    assert_eq!(cursor.known_flags.len(), 3);

    {
        let folder = client.store_mut().folder_mut("INBOX");
        folder.set_flags(2, &[Flag::Flagged]);
        folder.expunge(3);
        folder.insert(fake_store::TestMessage {
            uid: 4,
            internal_date: date(2024, 3, 12),
            flags: vec![Flag::Seen],
            modseq: 0,
            raw: raw("four", "<four@test>"),
        });
    }

    let (changes, updated) = client.detect(&cursor, &opts).await.unwrap();
    assert_eq!(changes.added, vec![4]);
    assert_eq!(changes.changed().collect::<Vec<_>>(), vec![2]);
    assert_eq!(changes.removed, uids(&[3]));
    assert!(!client.store_mut().calls().contains(&"vanished"));
    assert_disjoint(&changes, &cursor);

    let mut cursor = updated;
    cursor.acknowledge(&changes);
    assert_eq!(cursor.known_uids, uids(&[1, 2, 4]));
    assert!(cursor.known_flags[&2].flagged);
    assert!(!cursor.known_flags.contains_key(&3));
}

#[tokio::test]
async fn legacy_poll_ignores_flagged() {
    let mut client = client(three_messages(false));
    let opts = SyncOptions::new(ProtocolVersion::V2_5);
    let cursor = synced(&mut client, &opts).await;

    client
        .store_mut()
        .folder_mut("INBOX")
        .set_flags(2, &[Flag::Flagged]);
    let (changes, _) = client.detect(&cursor, &opts).await.unwrap();

    assert!(changes.is_empty());
}

// ── Errors ────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_folder_is_folder_gone() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;
    let before = cursor.clone();

    client.store_mut().remove_folder("INBOX");
    let err = client.detect(&cursor, &opts).await.unwrap_err();

    assert!(matches!(err, Error::FolderGone(_)));
    assert!(err.requires_resync());
    assert_eq!(cursor, before);
}

#[tokio::test]
async fn failing_status_is_folder_gone() {
    let mut client = client(three_messages(true));
    client.store_mut().fail_next("status");

    let err = client
        .detect(
            &FolderCursor::new(Mailbox::Inbox),
            &SyncOptions::new(ProtocolVersion::V14_1),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FolderGone(_)));
}

#[tokio::test]
async fn cursor_without_modseq_against_condstore_is_stale() {
    let mut client = client(three_messages(true));
    client.store_mut().folder_mut("INBOX").highest_mod_seq = 42;
    let cursor = FolderCursor {
        uid_next: 4,
        uid_validity: 1,
        known_uids: uids(&[1, 2, 3]),
        ..FolderCursor::new(Mailbox::Inbox)
    };

    let err = client
        .detect(&cursor, &SyncOptions::new(ProtocolVersion::V14_1))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StaleState(_)));
    assert!(err.requires_resync());
}

#[tokio::test]
async fn uidvalidity_change_is_stale() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;

    client.store_mut().folder_mut("INBOX").uid_validity = 2;
    let err = client.detect(&cursor, &opts).await.unwrap_err();

    assert!(matches!(err, Error::StaleState(_)));
}

#[tokio::test]
async fn cursor_ahead_of_store_is_stale() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let mut cursor = synced(&mut client, &opts).await;
    cursor.highest_mod_seq += 100;

    let err = client.detect(&cursor, &opts).await.unwrap_err();
    assert!(matches!(err, Error::StaleState(_)));
}

#[tokio::test]
async fn fetch_failure_is_store_unavailable() {
    let mut client = client(three_messages(false));
    client.store_mut().fail_next("fetch");

    let err = client
        .detect(
            &FolderCursor::new(Mailbox::Inbox),
            &SyncOptions::new(ProtocolVersion::V14_1),
        )
        .await
        .unwrap_err();

    match err {
        Error::StoreUnavailable { op, .. } => assert_eq!(op, "fetch"),
        other => panic!("unexpected {other:?}"),
    }
}

// ── Ping ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_tracks_status_counters() {
    let mut client = client(three_messages(true));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;

    assert!(!client.ping(&cursor).await.unwrap());

    client.store_mut().folder_mut("INBOX").set_flags(3, &[Flag::Seen]);
    assert!(client.ping(&cursor).await.unwrap());
}

#[tokio::test]
async fn ping_sees_new_mail_without_modseq() {
    let mut client = client(three_messages(false));
    let opts = SyncOptions::new(ProtocolVersion::V14_1);
    let cursor = synced(&mut client, &opts).await;

    client.store_mut().folder_mut("INBOX").insert(fake_store::TestMessage {
        uid: 4,
        internal_date: date(2024, 3, 12),
        flags: vec![],
        modseq: 0,
        raw: raw("four", "<four@test>"),
    });
    assert!(client.ping(&cursor).await.unwrap());

    client.store_mut().remove_folder("INBOX");
    assert!(matches!(client.ping(&cursor).await, Err(Error::FolderGone(_))));
}

// ── Message-ID lookup and flag writes ─────────────────────────────

#[tokio::test]
async fn uid_from_message_id_searches_live_uids() {
    let mut client = client(three_messages(true));
    let mut cursor = synced(&mut client, &SyncOptions::new(ProtocolVersion::V14_1)).await;

    assert_eq!(client.uid_from_message_id(&cursor, "<two@test>").await.unwrap(), 2);
    assert!(matches!(
        client.uid_from_message_id(&cursor, "<nope@test>").await,
        Err(Error::NotFound(_))
    ));

    cursor.removed_uids.insert(2);
    assert!(matches!(
        client.uid_from_message_id(&cursor, "<two@test>").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn categories_replace_table_flags() {
    let folders = MailboxBuilder::new()
        .folder("INBOX")
        .condstore()
        .message(
            1,
            date(2024, 3, 1),
            &[Flag::Seen, Flag::from("home_life")],
            &raw("one", "<one@test>"),
        )
        .build();
    let categories = CategoryMap::new()
        .with("work", "Work")
        .with("home_life", "Home Life");
    let mut client = SyncClient::new(FakeStore::new(folders), categories);

    client
        .categories_to_flags(&Mailbox::Inbox, 1, &["Work".to_string()])
        .await
        .unwrap();

    let request = client.store_mut().stores()[0].clone();
    assert_eq!(request.add, vec![Flag::from("work")]);
    assert_eq!(request.remove, vec![Flag::from("home_life")]);
    let flags = &client.store_mut().folder_mut("INBOX").messages[&1].flags;
    assert!(flags.contains(&Flag::Seen));
    assert!(flags.contains(&Flag::from("work")));
    assert!(!flags.contains(&Flag::from("home_life")));
}

#[tokio::test]
async fn flag_writes_map_to_imap_flags() {
    let mut client = client(three_messages(true));
    let inbox = Mailbox::Inbox;

    client.set_read(&inbox, 2, true).await.unwrap();
    client.set_flagged(&inbox, 2, true).await.unwrap();
    client.mark_forwarded(&inbox, 2).await.unwrap();
    client.mark_replied(&inbox, 3).await.unwrap();
    client.set_read(&inbox, 1, false).await.unwrap();

    let folder = client.store_mut().folder_mut("INBOX");
    assert_eq!(
        folder.messages[&2].flags,
        vec![Flag::Seen, Flag::Flagged, Flag::Forwarded]
    );
    assert_eq!(folder.messages[&3].flags, vec![Flag::Answered]);
    assert!(folder.messages[&1].flags.is_empty());
}
