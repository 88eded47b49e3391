//! Integration tests for room loading, saving, reconciliation and
//! eviction, driven through `RoomManager` the way connection handlers
//! drive it.

use std::sync::Arc;
use std::time::Duration;

use quire_file::{FileIndex, FileLoaderMapping, MemoryContentsManager};
use quire_protocol::{Frame, RoomMessage, SyncMessage};
use quire_room::{OutOfBandPolicy, RoomConfig, RoomHandle, RoomManager, RoomState, SOURCE};
use quire_store::{MemoryStore, UpdateStore};
use quire_transport::ConnectionId;
use rand::Rng;
use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

const ROOM: &str = "text:file:f1";

type Manager = RoomManager<MemoryStore, MemoryContentsManager>;
type Room = RoomHandle<MemoryStore, MemoryContentsManager>;

struct Fixture {
    manager: Manager,
    contents: Arc<MemoryContentsManager>,
    store: Arc<MemoryStore>,
    loaders: Arc<FileLoaderMapping<MemoryContentsManager>>,
}

fn fixture_with(config: RoomConfig, poll: Option<Duration>, with_store: bool) -> Fixture {
    let index = Arc::new(FileIndex::new());
    index.register("f1", "a.txt");
    let contents = Arc::new(MemoryContentsManager::new());
    contents.write_external("a.txt", "test");
    let loaders = Arc::new(FileLoaderMapping::new(index, Arc::clone(&contents), poll));
    let store = Arc::new(MemoryStore::new());
    let manager = RoomManager::new(
        Arc::clone(&loaders),
        with_store.then(|| Arc::clone(&store)),
        config,
    );
    Fixture {
        manager,
        contents,
        store,
        loaders,
    }
}

fn fast_config() -> RoomConfig {
    RoomConfig {
        save_delay: Some(Duration::from_millis(50)),
        cleanup_delay: Duration::from_millis(200),
        out_of_band: OutOfBandPolicy::ReloadFromDisk,
    }
}

fn fixture() -> Fixture {
    fixture_with(fast_config(), None, true)
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(bytes) = rx.try_recv() {
        frames.push(Frame::decode(&bytes).unwrap());
    }
    frames
}

/// A client-side copy of the document.
struct Replica {
    doc: Doc,
}

impl Replica {
    fn synced_with(room: &Room) -> Self {
        let replica = Self { doc: Doc::new() };
        replica.apply(&room.core().encode_state());
        replica
    }

    fn apply(&self, update: &[u8]) {
        let mut txn = self.doc.transact_mut();
        txn.apply_update(Update::decode_v1(update).unwrap()).unwrap();
    }

    fn insert(&self, index: u32, chunk: &str) -> Vec<u8> {
        let text = self.doc.get_or_insert_text(SOURCE);
        let mut txn = self.doc.transact_mut();
        text.insert(&mut txn, index, chunk);
        txn.encode_update_v1()
    }

    fn len(&self) -> u32 {
        let text = self.doc.get_or_insert_text(SOURCE);
        let txn = self.doc.transact();
        text.len(&txn)
    }

    fn text(&self) -> String {
        let text = self.doc.get_or_insert_text(SOURCE);
        let txn = self.doc.transact();
        text.get_string(&txn)
    }

    fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }
}

async fn send_update(room: &Room, conn: u64, update: Vec<u8>) {
    room.handle_frame(
        ConnectionId::new(conn),
        "tester",
        Frame::Sync(SyncMessage::Update(update)),
    )
    .await
    .unwrap();
}

// =========================================================================
// Creation and loading
// =========================================================================

#[tokio::test]
async fn test_concurrent_first_openers_share_one_room_and_one_load() {
    let fx = fixture();
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..20 {
        let manager = fx.manager.clone();
        tasks.spawn(async move { manager.get_room(ROOM).await.unwrap() });
    }
    let rooms: Vec<Room> = tasks.join_all().await;

    assert!(rooms.iter().all(|r| r.ptr_eq(&rooms[0])));
    assert_eq!(fx.manager.room_count().await, 1);
    assert_eq!(fx.contents.load_count(), 1);
    assert_eq!(rooms[0].state(), RoomState::Ready);
    assert_eq!(rooms[0].core().text(), "test");
}

#[tokio::test]
async fn test_missing_file_fails_and_evicts() {
    let fx = fixture();
    let err = fx.manager.get_room("text:file:nope").await.unwrap_err();
    assert!(err.is_file_not_found());
    assert!(!fx.manager.has_room("text:file:nope").await);
    assert!(!fx.loaders.contains("nope"));
}

#[tokio::test]
async fn test_malformed_document_id_rejected() {
    let fx = fixture();
    assert!(fx.manager.get_room("text::f1").await.is_err());
    assert_eq!(fx.manager.room_count().await, 0);
}

#[tokio::test]
async fn test_transient_room_has_no_session_and_leaves_immediately() {
    let fx = fixture();
    let (tx, _rx) = mpsc::unbounded_channel();
    let room = fx
        .manager
        .join("globalAwareness", ConnectionId::new(1), tx)
        .await
        .unwrap();
    assert!(matches!(room, RoomHandle::Transient(_)));
    assert_eq!(room.session_id(), None);
    assert!(fx.loaders.is_empty());

    fx.manager.leave(&room, ConnectionId::new(1)).await;
    let manager = fx.manager.clone();
    for _ in 0..100 {
        if !manager.has_room("globalAwareness").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!fx.manager.has_room("globalAwareness").await);
    assert_eq!(room.state(), RoomState::Stopped);
}

// =========================================================================
// Saving and out-of-band changes
// =========================================================================

#[tokio::test]
async fn test_edit_save_and_external_overwrite_scenario() {
    let fx = fixture();
    let room = fx.manager.get_room(ROOM).await.unwrap();
    assert_eq!(room.core().text(), "test");

    let client = Replica::synced_with(&room);
    send_update(&room, 1, client.insert(4, "2")).await;
    assert_eq!(room.core().text(), "test2");
    assert!(room.core().is_dirty());

    let contents = Arc::clone(&fx.contents);
    eventually("file saved", || {
        contents.content("a.txt").as_deref() == Some("test2")
    })
    .await;
    let core = room.clone();
    eventually("dirty cleared", || !core.core().is_dirty()).await;

    // Edit again and overwrite the file while the save is pending.
    send_update(&room, 1, client.insert(5, "3")).await;
    fx.contents.write_external("a.txt", "external");

    let core = room.clone();
    eventually("document reloaded", || core.core().text() == "external").await;
    assert_eq!(fx.contents.content("a.txt").as_deref(), Some("external"));
    assert_eq!(fx.contents.save_count(), 1);
}

#[tokio::test]
async fn test_debounce_collapses_rapid_edits() {
    let fx = fixture_with(
        RoomConfig {
            save_delay: Some(Duration::from_millis(100)),
            ..fast_config()
        },
        None,
        true,
    );
    let room = fx.manager.get_room(ROOM).await.unwrap();
    let client = Replica::synced_with(&room);
    for i in 0..5 {
        send_update(&room, 1, client.insert(4 + i, "!")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let contents = Arc::clone(&fx.contents);
    eventually("file saved", || {
        contents.content("a.txt").as_deref() == Some("test!!!!!")
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fx.contents.save_count(), 1);
}

#[tokio::test]
async fn test_save_disabled() {
    let fx = fixture_with(
        RoomConfig {
            save_delay: None,
            ..fast_config()
        },
        None,
        true,
    );
    let room = fx.manager.get_room(ROOM).await.unwrap();
    let client = Replica::synced_with(&room);
    send_update(&room, 1, client.insert(0, ">")).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fx.contents.content("a.txt").as_deref(), Some("test"));
    assert_eq!(fx.contents.save_count(), 0);
}

#[tokio::test]
async fn test_poll_reloads_clean_document() {
    let fx = fixture_with(fast_config(), Some(Duration::from_millis(20)), true);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let room = fx.manager.join(ROOM, ConnectionId::new(1), tx).await.unwrap();
    drain(&mut rx);

    fx.contents.write_external("a.txt", "from elsewhere");
    let core = room.clone();
    eventually("document reloaded", || core.core().text() == "from elsewhere").await;

    // The client receives the reload as an ordinary update.
    let replica = Replica { doc: Doc::new() };
    replica.apply(&room.core().encode_state());
    let frames = drain(&mut rx);
    assert!(frames
        .iter()
        .any(|f| matches!(f, Frame::Sync(SyncMessage::Update(_)))));
    assert_eq!(replica.text(), "from elsewhere");
}

#[tokio::test]
async fn test_clients_resolve_conflict_first_answer_wins() {
    let fx = fixture_with(
        RoomConfig {
            out_of_band: OutOfBandPolicy::AskClients,
            ..fast_config()
        },
        None,
        true,
    );
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let room = fx.manager.join(ROOM, ConnectionId::new(1), tx_a).await.unwrap();
    fx.manager.join(ROOM, ConnectionId::new(2), tx_b).await.unwrap();

    let client = Replica::synced_with(&room);
    send_update(&room, 1, client.insert(0, "mine: ")).await;
    fx.contents.write_external("a.txt", "theirs");

    let RoomHandle::Document(doc_room) = &room else {
        panic!("expected a document room");
    };
    let pending = Arc::clone(doc_room);
    eventually("conflict raised", || pending.pending_conflict().is_some()).await;
    let conflict = doc_room.pending_conflict().unwrap();

    let asked = |frames: Vec<Frame>| {
        frames.into_iter().any(|f| {
            f == Frame::room(RoomMessage::FileChanged, conflict.clone())
        })
    };
    assert!(asked(drain(&mut rx_a)));
    assert!(asked(drain(&mut rx_b)));

    // Autosave is suspended while the question is open.
    send_update(&room, 1, client.insert(0, "+")).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(fx.contents.content("a.txt").as_deref(), Some("theirs"));

    room.handle_frame(
        ConnectionId::new(2),
        "bob",
        Frame::room(RoomMessage::Overwrite, conflict.clone()),
    )
    .await
    .unwrap();
    room.handle_frame(
        ConnectionId::new(1),
        "ada",
        Frame::room(RoomMessage::Reload, conflict.clone()),
    )
    .await
    .unwrap();

    assert_eq!(fx.contents.content("a.txt").as_deref(), Some("+mine: test"));
    assert_eq!(room.core().text(), "+mine: test");
    assert!(doc_room.pending_conflict().is_none());
    let answered = Frame::room(RoomMessage::FileOverwritten, conflict.clone());
    assert!(drain(&mut rx_a).contains(&answered));
    let frames_b = drain(&mut rx_b);
    assert!(frames_b.contains(&answered));
    assert!(!frames_b.contains(&Frame::room(RoomMessage::DocOverwritten, conflict)));
}

#[tokio::test]
async fn test_conflict_left_by_every_asker_settles_by_reload() {
    let fx = fixture_with(
        RoomConfig {
            out_of_band: OutOfBandPolicy::AskClients,
            ..fast_config()
        },
        None,
        true,
    );
    let (tx_a, _rx_a) = mpsc::unbounded_channel();
    let room = fx.manager.join(ROOM, ConnectionId::new(1), tx_a).await.unwrap();
    let asker = Replica::synced_with(&room);
    fx.contents.write_external("a.txt", "theirs");
    send_update(&room, 1, asker.insert(0, "mine: ")).await;
    eventually("conflict raised", || room.pending_conflict().is_some()).await;

    fx.manager.leave(&room, ConnectionId::new(1)).await;
    assert!(room.pending_conflict().is_none());
    assert_eq!(room.core().text(), "theirs");

    // Rejoining inside the cleanup delay finds the same, unblocked room.
    let (tx_c, mut rx_c) = mpsc::unbounded_channel();
    let again = fx.manager.join(ROOM, ConnectionId::new(3), tx_c).await.unwrap();
    assert!(again.ptr_eq(&room));
    let late = Replica::synced_with(&again);
    let end = late.len();
    send_update(&again, 3, late.insert(end, "!")).await;

    let contents = Arc::clone(&fx.contents);
    eventually("late edit saved", || {
        contents.content("a.txt").as_deref() == Some("theirs!")
    })
    .await;
    assert!(again.pending_conflict().is_none());
    assert!(!drain(&mut rx_c)
        .iter()
        .any(|f| matches!(f, Frame::Room { kind: RoomMessage::FileChanged, .. })));
}

// =========================================================================
// Update log reconciliation
// =========================================================================

#[tokio::test]
async fn test_store_seeded_then_trusted_when_disk_matches() {
    let fx = fixture_with(
        RoomConfig {
            cleanup_delay: Duration::ZERO,
            ..fast_config()
        },
        None,
        true,
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let room = fx.manager.join(ROOM, ConnectionId::new(1), tx).await.unwrap();
    let session = room.session_id().unwrap();
    assert_eq!(fx.store.session_id(ROOM).await.unwrap(), Some(session.clone()));

    let client = Replica::synced_with(&room);
    send_update(&room, 1, client.insert(4, "ed")).await;
    let contents = Arc::clone(&fx.contents);
    eventually("file saved", || {
        contents.content("a.txt").as_deref() == Some("tested")
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    fx.manager.leave(&room, ConnectionId::new(1)).await;
    let manager = fx.manager.clone();
    for _ in 0..100 {
        if !manager.has_room(ROOM).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!fx.manager.has_room(ROOM).await);
    assert!(fx.loaders.is_empty());

    let reopened = fx.manager.get_room(ROOM).await.unwrap();
    assert!(!reopened.ptr_eq(&room));
    assert_eq!(reopened.core().text(), "tested");
    assert_eq!(reopened.session_id(), Some(session));
    // History survived: the client's replica merges without duplication.
    let replica = Replica::synced_with(&reopened);
    replica.apply(&client.doc.transact().encode_state_as_update_v1(&StateVector::default()));
    assert_eq!(replica.text(), "tested");
}

#[tokio::test]
async fn test_store_reset_when_disk_changed_while_closed() {
    let fx = fixture_with(
        RoomConfig {
            save_delay: None,
            cleanup_delay: Duration::ZERO,
            ..fast_config()
        },
        None,
        true,
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let room = fx.manager.join(ROOM, ConnectionId::new(1), tx).await.unwrap();
    let old_session = room.session_id().unwrap();
    let client = Replica::synced_with(&room);
    send_update(&room, 1, client.insert(0, "unsaved ")).await;
    fx.manager.leave(&room, ConnectionId::new(1)).await;
    let manager = fx.manager.clone();
    for _ in 0..100 {
        if !manager.has_room(ROOM).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fx.contents.write_external("a.txt", "edited offline");

    let reopened = fx.manager.get_room(ROOM).await.unwrap();
    assert_eq!(reopened.core().text(), "edited offline");
    let new_session = reopened.session_id().unwrap();
    assert_ne!(new_session, old_session);
    assert_eq!(fx.store.session_id(ROOM).await.unwrap(), Some(new_session));
    assert_eq!(fx.store.read(ROOM).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_without_store_room_still_gets_session() {
    let fx = fixture_with(fast_config(), None, false);
    let room = fx.manager.get_room(ROOM).await.unwrap();
    assert_eq!(room.core().text(), "test");
    assert_eq!(room.session_id().map(|s| s.len()), Some(32));
    assert!(fx.store.list().await.unwrap().is_empty());
}

// =========================================================================
// Eviction
// =========================================================================

#[tokio::test]
async fn test_reconnect_within_cleanup_delay_keeps_room() {
    let fx = fixture();
    let (tx, _rx) = mpsc::unbounded_channel();
    let room = fx.manager.join(ROOM, ConnectionId::new(1), tx).await.unwrap();
    let client = Replica::synced_with(&room);
    send_update(&room, 1, client.insert(0, "kept ")).await;

    fx.manager.leave(&room, ConnectionId::new(1)).await;
    assert!(fx.manager.is_eviction_pending(ROOM).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let again = fx.manager.join(ROOM, ConnectionId::new(2), tx).await.unwrap();
    assert!(again.ptr_eq(&room));
    assert!(!fx.manager.is_eviction_pending(ROOM).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fx.manager.has_room(ROOM).await);
    assert_eq!(again.core().text(), "kept test");
    assert_eq!(fx.contents.load_count(), 1);
}

#[tokio::test]
async fn test_duplicate_removal_is_noop_and_get_room_cancels() {
    let fx = fixture();
    fx.manager.get_room(ROOM).await.unwrap();
    fx.manager.remove_room(ROOM, Duration::from_millis(50)).await;
    fx.manager.remove_room(ROOM, Duration::from_secs(60)).await;
    assert!(fx.manager.is_eviction_pending(ROOM).await);

    fx.manager.get_room(ROOM).await.unwrap();
    assert!(!fx.manager.is_eviction_pending(ROOM).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fx.manager.has_room(ROOM).await);

    fx.manager.remove_room("text:file:unknown", Duration::ZERO).await;
    assert!(!fx.manager.is_eviction_pending("text:file:unknown").await);
}

#[tokio::test]
async fn test_clear_stops_everything() {
    let fx = fixture();
    let doc_room = fx.manager.get_room(ROOM).await.unwrap();
    let transient = fx.manager.get_room("globalAwareness").await.unwrap();
    assert_eq!(
        fx.manager.room_ids().await,
        vec!["globalAwareness".to_string(), ROOM.to_string()]
    );

    fx.manager.clear().await;
    assert_eq!(fx.manager.room_count().await, 0);
    assert_eq!(doc_room.state(), RoomState::Stopped);
    assert_eq!(transient.state(), RoomState::Stopped);
    assert!(fx.loaders.is_empty());
    assert!(doc_room.initialize().await.is_err());
}

// =========================================================================
// Convergence
// =========================================================================

#[tokio::test]
async fn test_random_concurrent_inserts_converge() {
    let fx = fixture_with(
        RoomConfig {
            save_delay: None,
            ..fast_config()
        },
        None,
        true,
    );
    let room = fx.manager.get_room(ROOM).await.unwrap();
    let alice = Replica::synced_with(&room);
    let bob = Replica::synced_with(&room);

    let mut rng = rand::rng();
    let mut updates = Vec::new();
    let mut inserted = String::new();
    for i in 0..50 {
        let (replica, conn, ch) = if i % 2 == 0 {
            (&alice, 1, 'a')
        } else {
            (&bob, 2, 'b')
        };
        let at = rng.random_range(0..=replica.len());
        updates.push((conn, replica.insert(at, &ch.to_string())));
        inserted.push(ch);
    }
    // Deliver in a shuffled order; updates from one client stay ordered.
    let (mut from_a, mut from_b): (Vec<_>, Vec<_>) =
        updates.into_iter().partition(|(conn, _)| *conn == 1);
    from_a.reverse();
    from_b.reverse();
    while !from_a.is_empty() || !from_b.is_empty() {
        let pick_a = !from_a.is_empty() && (from_b.is_empty() || rng.random_bool(0.5));
        let (conn, update) = if pick_a {
            from_a.pop().unwrap()
        } else {
            from_b.pop().unwrap()
        };
        send_update(&room, conn, update).await;
    }

    for replica in [&alice, &bob] {
        let diff = room
            .core()
            .doc()
            .transact()
            .encode_diff_v1(&replica.state_vector());
        replica.apply(&diff);
    }

    let server = room.core().text();
    assert_eq!(alice.text(), server);
    assert_eq!(bob.text(), server);
    let mut got: Vec<char> = server.chars().collect();
    let mut want: Vec<char> = format!("test{inserted}").chars().collect();
    got.sort_unstable();
    want.sort_unstable();
    assert_eq!(got, want);
}
