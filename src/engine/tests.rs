use super::*;
use crate::block::{cid_of, RAW};
use crate::message::{BitswapCodec, Wantlist};
use crate::peer::OutboundFrames;
use crate::storage::MemoryBlockstore;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

struct TestPeer {
    id: PeerId,
    conn_id: ConnectionId,
    rx: OutboundFrames,
}

impl TestPeer {
    /// Every message flushed to this peer since the last call
    fn sent(&mut self) -> Vec<Message> {
        let mut codec = BitswapCodec::default();
        let mut messages = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            let mut buf = BytesMut::from(&frame[..]);
            let (message, _) = codec.decode(&mut buf).unwrap().unwrap();
            messages.push(message);
        }
        messages
    }

    fn sent_wants(&mut self) -> Vec<WantEntry> {
        self.sent()
            .into_iter()
            .flat_map(|m| m.wantlist.entries)
            .collect()
    }
}

fn engine() -> Engine<MemoryBlockstore> {
    Engine::new(Arc::new(MemoryBlockstore::new()), BitswapConfig::default())
}

fn connect<B: Blockstore>(engine: &Engine<B>) -> TestPeer {
    connect_as(engine, PeerId::random())
}

fn connect_as<B: Blockstore>(engine: &Engine<B>, id: PeerId) -> TestPeer {
    let addr = "10.0.0.1:4001".parse().unwrap();
    let (conn, rx) = Connection::new(id, addr, crate::MAX_MESSAGE_SIZE);
    let conn_id = conn.id();
    engine.add_connection(conn);
    TestPeer { id, conn_id, rx }
}

fn wants(entries: Vec<WantEntry>) -> Message {
    Message {
        wantlist: Wantlist {
            full: false,
            entries,
        },
        ..Message::default()
    }
}

fn blocks(blocks: Vec<Block>) -> Message {
    Message {
        blocks,
        ..Message::default()
    }
}

#[tokio::test]
async fn test_satisfies_remote_block_want() {
    let engine = engine();
    let block = Block::new(&b"bytes one"[..], RAW);
    engine.store().put_keyed(block.cid(), block.data().clone()).await.unwrap();

    let mut p = connect(&engine);
    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::block(*block.cid(), 1)]))
        .await;

    let sent = p.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].blocks, vec![block.clone()]);
    assert!(sent[0].block_presences.is_empty());
    assert!(!engine.peer_wantlist(&p.id).unwrap().contains_key(block.cid()));
}

#[tokio::test]
async fn test_have_want_answers_dont_have() {
    let engine = engine();
    let mut p = connect(&engine);
    let cid = cid_of(b"absent", RAW);

    engine
        .receive_message(
            &p.id,
            p.conn_id,
            wants(vec![WantEntry::have(cid, 1).with_send_dont_have(true)]),
        )
        .await;

    let sent = p.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].blocks.is_empty());
    assert_eq!(sent[0].block_presences, vec![BlockPresence::dont_have(cid)]);
}

#[tokio::test]
async fn test_have_want_answers_have() {
    let engine = engine();
    let cid = engine.put(Bytes::from_static(b"present"), RAW).await.unwrap();
    let mut p = connect(&engine);

    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::have(cid, 1)]))
        .await;

    let sent = p.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].blocks.is_empty());
    assert_eq!(sent[0].block_presences, vec![BlockPresence::have(cid)]);
}

#[tokio::test]
async fn test_absent_block_want_stays_pending_silently() {
    let engine = engine();
    let mut p = connect(&engine);
    let cid = cid_of(b"later", RAW);

    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::block(cid, 1)]))
        .await;

    assert!(p.sent().is_empty());
    let wantlist = engine.peer_wantlist(&p.id).unwrap();
    assert_eq!(wantlist[&cid].want_type, WantType::Block);
}

#[tokio::test]
async fn test_local_want_resolved_by_remote_block() {
    let engine = engine();
    let mut q = connect(&engine);
    let mut r = connect(&engine);
    let block = Block::new(&b"bytes three"[..], RAW);
    let cid = *block.cid();

    let handle = engine.want(cid);
    assert_eq!(q.sent_wants(), vec![WantEntry::block(cid, 1)]);
    assert_eq!(r.sent_wants(), vec![WantEntry::block(cid, 1)]);

    engine
        .receive_message(&q.id, q.conn_id, blocks(vec![block.clone()]))
        .await;

    assert_eq!(handle.await.unwrap(), *block.data());
    assert_eq!(engine.store().get(&cid).await.unwrap(), Some(block.data().clone()));
    assert!(!engine.is_wanted(&cid));

    // Cancel goes to the other peer only
    assert_eq!(r.sent_wants(), vec![WantEntry::cancel(cid)]);
    assert!(q.sent().is_empty());
}

#[tokio::test]
async fn test_full_wantlist_replaces_previous() {
    let engine = engine();
    let r = connect(&engine);
    let (a, b, c) = (cid_of(b"a", RAW), cid_of(b"b", RAW), cid_of(b"c", RAW));

    engine
        .receive_message(
            &r.id,
            r.conn_id,
            wants(vec![WantEntry::block(a, 1), WantEntry::block(b, 1)]),
        )
        .await;

    let full = Message {
        wantlist: Wantlist {
            full: true,
            entries: vec![WantEntry::block(c, 1)],
        },
        ..Message::default()
    };
    engine.receive_message(&r.id, r.conn_id, full).await;

    let wantlist = engine.peer_wantlist(&r.id).unwrap();
    assert_eq!(wantlist.keys().copied().collect::<Vec<_>>(), vec![c]);
}

#[tokio::test]
async fn test_local_put_forwards_to_waiting_peer() {
    let engine = engine();
    let mut s = connect(&engine);
    let data = Bytes::from_static(b"bytes four");
    let cid = cid_of(&data, RAW);

    engine
        .receive_message(&s.id, s.conn_id, wants(vec![WantEntry::block(cid, 1)]))
        .await;
    assert!(s.sent().is_empty());

    assert_eq!(engine.put(data.clone(), RAW).await.unwrap(), cid);

    let sent = s.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].blocks, vec![Block::from_parts(cid, data)]);
    assert!(!engine.peer_wantlist(&s.id).unwrap().contains_key(&cid));
}

#[tokio::test]
async fn test_have_want_gets_presence_on_acquisition() {
    let engine = engine();
    let mut s = connect(&engine);
    let data = Bytes::from_static(b"presence only");
    let cid = cid_of(&data, RAW);

    engine
        .receive_message(&s.id, s.conn_id, wants(vec![WantEntry::have(cid, 1)]))
        .await;
    engine.put(data, RAW).await.unwrap();

    let sent = s.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].block_presences, vec![BlockPresence::have(cid)]);
    assert!(sent[0].blocks.is_empty());
}

#[tokio::test]
async fn test_block_from_peer_is_forwarded_to_others() {
    let engine = engine();
    let mut sender = connect(&engine);
    let mut waiting = connect(&engine);
    let block = Block::new(&b"relay"[..], RAW);

    engine
        .receive_message(
            &waiting.id,
            waiting.conn_id,
            wants(vec![WantEntry::block(*block.cid(), 1)]),
        )
        .await;
    engine
        .receive_message(&sender.id, sender.conn_id, blocks(vec![block.clone()]))
        .await;

    assert_eq!(waiting.sent()[0].blocks, vec![block]);
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn test_cancel_retracts_want_everywhere() {
    let engine = engine();
    let mut peers: Vec<TestPeer> = (0..3).map(|_| connect(&engine)).collect();
    let cid = cid_of(b"never arrives", RAW);

    let handle = engine.want(cid);
    assert!(engine.cancel(&cid));

    assert!(engine.local_wants().is_empty());
    for peer in &mut peers {
        assert_eq!(
            peer.sent_wants(),
            vec![WantEntry::block(cid, 1), WantEntry::cancel(cid)]
        );
    }
    assert!(matches!(handle.await, Err(BitswapError::Cancelled)));

    // Cancelling again is a no-op
    assert!(!engine.cancel(&cid));
}

#[tokio::test]
async fn test_at_most_one_block_per_want() {
    let engine = engine();
    let mut p = connect(&engine);
    let mut other = connect(&engine);
    let block = Block::new(&b"once"[..], RAW);

    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::block(*block.cid(), 1)]))
        .await;

    engine.put(block.data().clone(), RAW).await.unwrap();
    engine.put(block.data().clone(), RAW).await.unwrap();
    engine
        .receive_message(&other.id, other.conn_id, blocks(vec![block.clone()]))
        .await;

    let delivered: usize = p.sent().iter().map(|m| m.blocks.len()).sum();
    assert_eq!(delivered, 1);
    assert!(other.sent().is_empty());

    // A fresh want gets the block again
    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::block(*block.cid(), 1)]))
        .await;
    assert_eq!(p.sent()[0].blocks, vec![block]);
}

#[tokio::test]
async fn test_want_broadcast_once_per_connection() {
    let engine = engine();
    let mut peers: Vec<TestPeer> = (0..3).map(|_| connect(&engine)).collect();
    let block = Block::new(&b"shared"[..], RAW);
    let cid = *block.cid();

    let first = engine.want(cid);
    let second = engine.want(cid);

    for peer in &mut peers {
        assert_eq!(peer.sent_wants(), vec![WantEntry::block(cid, 1)]);
    }
    assert_eq!(engine.local_wants(), vec![cid]);

    engine.put(block.data().clone(), RAW).await.unwrap();
    assert_eq!(first.await.unwrap(), *block.data());
    assert_eq!(second.await.unwrap(), *block.data());
}

#[tokio::test]
async fn test_new_peer_receives_outstanding_wants() {
    let engine = engine();
    let cid = cid_of(b"wanted before connect", RAW);
    let _handle = engine.want_with_priority(cid, 7);

    let mut late = connect(&engine);
    assert_eq!(late.sent_wants(), vec![WantEntry::block(cid, 7)]);

    // A second stream from the same peer doesn't repeat it
    let mut second = connect_as(&engine, late.id);
    assert!(second.sent().is_empty());
    assert!(late.sent().is_empty());
}

#[tokio::test]
async fn test_send_dont_have_config_applies_to_local_wants() {
    let config = BitswapConfig {
        send_dont_have: true,
        ..BitswapConfig::default()
    };
    let engine = Engine::new(Arc::new(MemoryBlockstore::new()), config);
    let mut p = connect(&engine);
    let cid = cid_of(b"x", RAW);

    let _handle = engine.want(cid);
    assert_eq!(
        p.sent_wants(),
        vec![WantEntry::block(cid, 1).with_send_dont_have(true)]
    );
}

#[tokio::test]
async fn test_peer_survives_until_last_stream_closes() {
    let engine = engine();
    let first = connect(&engine);
    let second = connect_as(&engine, first.id);
    let cid = cid_of(b"pending", RAW);

    engine
        .receive_message(&first.id, first.conn_id, wants(vec![WantEntry::block(cid, 1)]))
        .await;
    assert_eq!(engine.stats().connections, 2);

    engine.close_connection(&first.id, first.conn_id);
    assert!(engine.is_connected(&first.id));
    assert!(engine.peer_wantlist(&first.id).unwrap().contains_key(&cid));

    engine.close_connection(&second.id, second.conn_id);
    assert!(!engine.is_connected(&first.id));
    assert!(engine.peer_wantlist(&first.id).is_none());
}

#[tokio::test]
async fn test_reply_goes_to_originating_stream() {
    let engine = engine();
    let mut first = connect(&engine);
    let mut second = connect_as(&engine, first.id);
    let cid = engine.put(Bytes::from_static(b"reply here"), RAW).await.unwrap();

    engine
        .receive_message(&second.id, second.conn_id, wants(vec![WantEntry::block(cid, 1)]))
        .await;

    assert!(first.sent().is_empty());
    assert_eq!(second.sent()[0].blocks.len(), 1);
}

#[tokio::test]
async fn test_remove_connection_discards_ledger() {
    let engine = engine();
    let mut p = connect(&engine);
    let cid = cid_of(b"gone", RAW);
    let _handle = engine.want(cid);
    assert_eq!(p.sent_wants().len(), 1);

    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::block(cid_of(b"theirs", RAW), 1)]))
        .await;

    assert!(engine.remove_connection(&p.id));
    assert!(!engine.is_connected(&p.id));
    assert_eq!(engine.stats().peer_wants, 0);
    assert!(!engine.remove_connection(&p.id));

    // Messages on the dead stream are ignored
    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::block(cid, 1)]))
        .await;
    assert!(engine.peer_wantlist(&p.id).is_none());

    // Reconnecting re-sends the local want
    let mut again = connect_as(&engine, p.id);
    assert_eq!(again.sent_wants(), vec![WantEntry::block(cid, 1)]);
}

#[tokio::test]
async fn test_add_connection_updates_remote_address() {
    let engine = engine();
    let peer = connect(&engine);

    let new_addr: SocketAddr = "10.0.0.2:5001".parse().unwrap();
    let (conn, _rx) = Connection::new(peer.id, new_addr, crate::MAX_MESSAGE_SIZE);
    engine.add_connection(conn);

    assert_eq!(engine.peer_address(&peer.id), Some(new_addr));
    assert_eq!(engine.connected_peers(), vec![peer.id]);
}

#[tokio::test]
async fn test_want_timeout_withdraws_want() {
    let engine = engine();
    let mut p = connect(&engine);
    let cid = cid_of(b"slow", RAW);

    let result = engine.want_timeout(cid, Duration::from_millis(20)).await;
    assert!(matches!(result, Err(BitswapError::Timeout(_))));
    assert!(!engine.is_wanted(&cid));
    assert_eq!(
        p.sent_wants(),
        vec![WantEntry::block(cid, 1), WantEntry::cancel(cid)]
    );
}

#[tokio::test]
async fn test_want_timeout_keeps_other_waiters() {
    let engine = engine();
    let cid = cid_of(b"shared slow", RAW);
    let patient = engine.want(cid);

    let result = engine.want_timeout(cid, Duration::from_millis(20)).await;
    assert!(matches!(result, Err(BitswapError::Timeout(_))));
    assert!(engine.is_wanted(&cid));

    engine.put(Bytes::from_static(b"shared slow"), RAW).await.unwrap();
    assert_eq!(patient.await.unwrap(), Bytes::from_static(b"shared slow"));
}

#[tokio::test]
async fn test_get_prefers_local_store() {
    let engine = engine();
    let mut p = connect(&engine);
    let cid = engine.put(Bytes::from_static(b"local"), RAW).await.unwrap();

    assert_eq!(engine.get(&cid).await.unwrap(), Bytes::from_static(b"local"));
    assert!(p.sent().is_empty());
    assert!(engine.local_wants().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_waiters() {
    let engine = engine();
    let p = connect(&engine);
    let handle = engine.want(cid_of(b"a", RAW));

    engine.shutdown();

    assert!(matches!(handle.await, Err(BitswapError::Cancelled)));
    assert!(!engine.is_connected(&p.id));
    assert!(matches!(
        engine.want(cid_of(b"b", RAW)).await,
        Err(BitswapError::Cancelled)
    ));

    // New streams are refused
    let late = connect(&engine);
    assert!(!engine.is_connected(&late.id));
}

/// Store whose every operation fails
struct FailingBlockstore;

impl Blockstore for FailingBlockstore {
    async fn get(&self, _cid: &Cid) -> Result<Option<Bytes>> {
        Err(BitswapError::StoreError("disk unavailable".to_string()))
    }

    async fn put_keyed(&self, _cid: &Cid, _data: Bytes) -> Result<()> {
        Err(BitswapError::StoreError("disk unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_store_read_error_counts_as_absent() {
    let engine = Engine::new(Arc::new(FailingBlockstore), BitswapConfig::default());
    let mut p = connect(&engine);
    let cid = cid_of(b"unreadable", RAW);

    engine
        .receive_message(
            &p.id,
            p.conn_id,
            wants(vec![WantEntry::block(cid, 1).with_send_dont_have(true)]),
        )
        .await;

    assert_eq!(p.sent()[0].block_presences, vec![BlockPresence::dont_have(cid)]);
}

#[tokio::test]
async fn test_store_write_error_leaves_want_pending() {
    let engine = Engine::new(Arc::new(FailingBlockstore), BitswapConfig::default());
    let q = connect(&engine);
    let block = Block::new(&b"unwritable"[..], RAW);

    let mut handle = engine.want(*block.cid());
    engine
        .receive_message(&q.id, q.conn_id, blocks(vec![block.clone()]))
        .await;

    assert!(engine.is_wanted(block.cid()));
    let pending = tokio::time::timeout(Duration::from_millis(20), &mut handle).await;
    assert!(pending.is_err());
    assert!(engine.put(block.data().clone(), RAW).await.is_err());
}

#[tokio::test]
async fn test_unsendable_block_treated_as_absent() {
    let engine = engine();
    let big = Bytes::from(vec![7u8; 3 * 1024 * 1024]);
    let cid = engine.put(big, RAW).await.unwrap();
    let mut p = connect(&engine);

    engine
        .receive_message(
            &p.id,
            p.conn_id,
            wants(vec![WantEntry::block(cid, 1).with_send_dont_have(true)]),
        )
        .await;

    let sent = p.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].blocks.is_empty());
    assert_eq!(sent[0].block_presences, vec![BlockPresence::dont_have(cid)]);
    assert!(engine.peer_wantlist(&p.id).unwrap().contains_key(&cid));
}

#[tokio::test]
async fn test_unsendable_block_not_forwarded() {
    let engine = engine();
    let mut p = connect(&engine);
    let big = Bytes::from(vec![9u8; 3 * 1024 * 1024]);
    let cid = cid_of(&big, RAW);

    engine
        .receive_message(&p.id, p.conn_id, wants(vec![WantEntry::block(cid, 1)]))
        .await;
    engine.put(big, RAW).await.unwrap();

    assert!(p.sent().is_empty());
    assert!(engine.peer_wantlist(&p.id).unwrap().contains_key(&cid));
}

#[tokio::test]
async fn test_dropped_handle_withdraws_want() {
    let engine = engine();
    let mut p = connect(&engine);
    let cid = cid_of(b"abandoned", RAW);

    let handle = engine.want(cid);
    drop(handle);

    assert!(!engine.is_wanted(&cid));
    assert_eq!(
        p.sent_wants(),
        vec![WantEntry::block(cid, 1), WantEntry::cancel(cid)]
    );

    // A later peer isn't asked for it
    let mut late = connect(&engine);
    assert!(late.sent().is_empty());
}

#[tokio::test]
async fn test_dropped_handle_keeps_shared_want() {
    let engine = engine();
    let cid = cid_of(b"still wanted", RAW);

    let kept = engine.want(cid);
    drop(engine.want(cid));
    assert!(engine.is_wanted(&cid));

    engine.put(Bytes::from_static(b"still wanted"), RAW).await.unwrap();
    assert_eq!(kept.await.unwrap(), Bytes::from_static(b"still wanted"));
}

#[tokio::test]
async fn test_abandoned_get_withdraws_want() {
    let engine = engine();
    let cid = cid_of(b"given up on", RAW);

    let result = tokio::time::timeout(Duration::from_millis(20), engine.get(&cid)).await;
    assert!(result.is_err());
    assert!(engine.local_wants().is_empty());
}
