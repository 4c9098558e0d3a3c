mod ledger;

pub use ledger::PeerWant;

use crate::block::Block;
use crate::config::BitswapConfig;
use crate::error::{BitswapError, Result};
use crate::message::{BlockPresence, Message, PresenceType, WantEntry, WantType};
use crate::peer::{Connection, ConnectionId, PeerId};
use crate::storage::Blockstore;
use bytes::Bytes;
use cid::Cid;
use ledger::{Ledger, LocalWant, PeerLedger};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Connections whose buffers were written to during one dispatch
type Touched = HashSet<(PeerId, ConnectionId)>;

type ReleaseFn = Box<dyn FnOnce(&Cid) + Send>;

/// Resolves with the block bytes once a wanted CID arrives.
///
/// Fails with `BitswapError::Cancelled` if the want is cancelled or the engine
/// shuts down. Dropping an unresolved handle withdraws the want unless
/// another handle still waits for the same CID.
pub struct WantHandle {
    cid: Cid,
    rx: oneshot::Receiver<Bytes>,
    release: Option<ReleaseFn>,
}

impl WantHandle {
    pub fn cid(&self) -> &Cid {
        &self.cid
    }
}

impl fmt::Debug for WantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WantHandle")
            .field("cid", &self.cid.to_string())
            .field("pending", &self.release.is_some())
            .finish()
    }
}

impl Future for WantHandle {
    type Output = Result<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let poll = Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| BitswapError::Cancelled));
        if poll.is_ready() {
            self.release = None;
        }
        poll
    }
}

impl Drop for WantHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            // Lets the engine see this waiter as gone
            self.rx.close();
            release(&self.cid);
        }
    }
}

/// Snapshot of the engine's ledgers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub peers: usize,
    pub connections: usize,
    pub local_wants: usize,
    pub peer_wants: usize,
}

/// Block-exchange coordinator.
///
/// Owns the per-peer ledgers, the local wantlist and the outbound side of
/// every connection. Cloning yields another handle to the same engine.
pub struct Engine<B> {
    inner: Arc<Inner<B>>,
}

struct Inner<B> {
    store: Arc<B>,
    config: BitswapConfig,
    ledger: Mutex<Ledger>,
}

impl<B> Clone for Engine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Reply queued for a remote want
enum Reply {
    Block(Block),
    Presence(BlockPresence),
}

impl<B: Blockstore> Engine<B> {
    pub fn new(store: Arc<B>, config: BitswapConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                ledger: Mutex::new(Ledger::default()),
            }),
        }
    }

    pub fn config(&self) -> &BitswapConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<B> {
        &self.inner.store
    }

    // No await happens while this guard is held
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn want_entry(&self, cid: Cid, priority: i32) -> WantEntry {
        WantEntry::block(cid, priority).with_send_dont_have(self.inner.config.send_dont_have)
    }

    /// Register a stream with the engine and mark it open.
    ///
    /// Registering a peer that is already known only updates its remote
    /// address and adds the stream. A newly known peer is sent every
    /// outstanding local want.
    pub fn add_connection(&self, mut connection: Connection) {
        let peer_id = *connection.peer_id();
        let remote_addr = connection.remote_addr();

        let mut ledger = self.ledger();
        if ledger.shut_down {
            debug!("Engine shut down, refusing connection from {}", peer_id);
            connection.close();
            return;
        }

        connection.open();

        let Ledger {
            peers, local_wants, ..
        } = &mut *ledger;

        let is_new = !peers.contains_key(&peer_id);
        let peer = peers
            .entry(peer_id)
            .or_insert_with(|| PeerLedger::new(remote_addr));
        peer.remote_addr = remote_addr;
        peer.connections.push(connection);

        if is_new {
            info!("Peer {} connected from {}", peer_id, remote_addr);
        } else {
            debug!(
                "Additional stream to {} ({} open)",
                peer_id,
                peer.connections.len()
            );
        }

        // Re-broadcast our wantlist to peers that haven't seen it
        let Some(conn) = peer.primary_mut() else {
            return;
        };
        for (cid, want) in local_wants.iter_mut() {
            if want.sent_to.insert(peer_id) {
                conn.enqueue_want(self.want_entry(*cid, want.priority));
            }
        }
        conn.flush();
    }

    /// Tear down one stream; the peer is forgotten once its last stream closes
    pub fn close_connection(&self, peer_id: &PeerId, conn_id: ConnectionId) {
        let mut ledger = self.ledger();

        let Some(peer) = ledger.peers.get_mut(peer_id) else {
            return;
        };

        if let Some(pos) = peer.connections.iter().position(|c| c.id() == conn_id) {
            let mut connection = peer.connections.remove(pos);
            connection.close();
        }

        if peer.connections.iter().any(|c| c.is_open()) {
            return;
        }

        ledger.remove_peer(peer_id);
        info!("Peer {} disconnected", peer_id);
    }

    /// Drop all bookkeeping for a peer and close its streams
    pub fn remove_connection(&self, peer_id: &PeerId) -> bool {
        let removed = self.ledger().remove_peer(peer_id);
        if removed {
            info!("Peer {} removed", peer_id);
        }
        removed
    }

    /// Process a message that arrived on `conn_id` from `peer_id`.
    ///
    /// Applies the wantlist, stores and routes received blocks, notes
    /// presences, then flushes every connection that got new entries.
    /// Blockstore calls happen outside the ledger lock.
    pub async fn receive_message(&self, peer_id: &PeerId, conn_id: ConnectionId, message: Message) {
        let Message {
            wantlist,
            blocks,
            block_presences,
            pending_bytes,
        } = message;

        debug!(
            "Message from {}: {} wants (full: {}), {} blocks, {} presences",
            peer_id,
            wantlist.entries.len(),
            wantlist.full,
            blocks.len(),
            block_presences.len()
        );

        // 1. Apply wantlist
        let pending = {
            let mut ledger = self.ledger();
            let Some(peer) = ledger.peers.get_mut(peer_id) else {
                warn!("Message from unknown peer {}", peer_id);
                return;
            };
            if !peer.is_open(conn_id) {
                debug!("Ignoring message on closed connection {} from {}", conn_id, peer_id);
                return;
            }
            peer.apply_wantlist(&wantlist)
        };

        let mut lookups = Vec::with_capacity(pending.len());
        for entry in pending {
            let found = match self.inner.store.get(&entry.cid).await {
                Ok(found) => found,
                Err(e) => {
                    // Read failures count as absence
                    warn!("Blockstore read for {} failed: {}", entry.cid, e);
                    None
                }
            };
            lookups.push((entry.cid, found));
        }

        let mut touched = Touched::new();
        {
            let mut ledger = self.ledger();
            if let Some(peer) = ledger.peers.get_mut(peer_id) {
                for (cid, found) in lookups {
                    if let Some(id) = respond(peer, conn_id, cid, found) {
                        touched.insert((*peer_id, id));
                    }
                }
            }
        }

        // 2. Apply blocks
        for block in blocks {
            if let Err(e) = self.inner.store.put_keyed(block.cid(), block.data().clone()).await {
                // Treated as never having arrived
                warn!("Failed to store block {} from {}: {}", block.cid(), peer_id, e);
                continue;
            }
            self.block_acquired(&block, Some(peer_id), &mut touched);
        }

        // 3. Presences are informational only
        for presence in &block_presences {
            match presence.presence {
                PresenceType::Have => debug!("{} has {}", peer_id, presence.cid),
                PresenceType::DontHave => debug!("{} doesn't have {}", peer_id, presence.cid),
            }
        }
        if pending_bytes > 0 {
            debug!("{} reports {} pending bytes", peer_id, pending_bytes);
        }

        // 4. Flush
        self.flush(&touched);
    }

    /// Resolve local waiters for a newly stored block and push it to peers
    /// that want it. `from` is the peer that sent it, if any.
    fn block_acquired(&self, block: &Block, from: Option<&PeerId>, touched: &mut Touched) {
        let cid = *block.cid();

        let waiters = {
            let mut ledger = self.ledger();
            let Ledger {
                peers, local_wants, ..
            } = &mut *ledger;

            let waiters = match local_wants.remove(&cid) {
                Some(want) => {
                    // Retract the want everywhere else we sent it
                    for peer_id in &want.sent_to {
                        if Some(peer_id) == from {
                            continue;
                        }
                        let Some(conn) = peers.get_mut(peer_id).and_then(|p| p.primary_mut()) else {
                            continue;
                        };
                        conn.enqueue_want(WantEntry::cancel(cid));
                        touched.insert((*peer_id, conn.id()));
                    }
                    want.waiters
                }
                None => Vec::new(),
            };

            for (peer_id, peer) in peers.iter_mut() {
                if Some(peer_id) == from {
                    continue;
                }
                let Some(want) = peer.wants.get(&cid).copied() else {
                    continue;
                };
                let Some(conn) = peer.primary_mut() else {
                    continue;
                };
                if !conn.can_send(block) {
                    // The want stays recorded; nothing we hold can answer it
                    debug!("Block {} too large to forward to {}", cid, peer_id);
                    continue;
                }

                match want.want_type {
                    WantType::Block => conn.enqueue_block(block.clone()),
                    WantType::Have => conn.enqueue_presence(BlockPresence::have(cid)),
                }
                touched.insert((*peer_id, conn.id()));

                if want.want_type == WantType::Block {
                    peer.wants.remove(&cid);
                }
            }

            waiters
        };

        if !waiters.is_empty() {
            debug!("Block {} resolves {} local wants", cid, waiters.len());
        }
        for waiter in waiters {
            // Receiver may have given up already
            let _ = waiter.send(block.data().clone());
        }
    }

    fn flush(&self, touched: &Touched) {
        if touched.is_empty() {
            return;
        }

        let mut ledger = self.ledger();
        for (peer_id, conn_id) in touched {
            if let Some(conn) = ledger
                .peers
                .get_mut(peer_id)
                .and_then(|p| p.connection_mut(*conn_id))
            {
                conn.flush();
            }
        }
    }

    /// Ask every connected peer for `cid` with the default priority
    pub fn want(&self, cid: Cid) -> WantHandle {
        self.want_with_priority(cid, self.inner.config.default_priority)
    }

    /// Register a local want and broadcast WANT-BLOCK to every open
    /// connection that hasn't been sent one for this CID yet.
    ///
    /// Concurrent wants for the same CID share one ledger entry; each handle
    /// gets the block.
    pub fn want_with_priority(&self, cid: Cid, priority: i32) -> WantHandle {
        let (tx, rx) = oneshot::channel();

        let mut ledger = self.ledger();
        if ledger.shut_down {
            // tx dropped: resolves as cancelled
            return WantHandle {
                cid,
                rx,
                release: None,
            };
        }

        let Ledger {
            peers, local_wants, ..
        } = &mut *ledger;

        let want = local_wants
            .entry(cid)
            .or_insert_with(|| LocalWant::new(priority));
        want.prune();
        want.waiters.push(tx);

        let mut broadcast = 0;
        for (peer_id, peer) in peers.iter_mut() {
            if want.sent_to.contains(peer_id) {
                continue;
            }
            let Some(conn) = peer.primary_mut() else {
                continue;
            };

            conn.enqueue_want(self.want_entry(cid, want.priority));
            conn.flush();
            want.sent_to.insert(*peer_id);
            broadcast += 1;
        }

        debug!(
            "Want {} ({} waiters, sent to {} new peers)",
            cid,
            want.waiters.len(),
            broadcast
        );

        let engine = Arc::downgrade(&self.inner);
        let release: ReleaseFn = Box::new(move |cid: &Cid| {
            if let Some(inner) = engine.upgrade() {
                Engine { inner }.release(cid);
            }
        });

        WantHandle {
            cid,
            rx,
            release: Some(release),
        }
    }

    /// Drop every local waiter for `cid` and send CANCEL to the peers that
    /// were asked for it. Returns false if `cid` wasn't wanted.
    pub fn cancel(&self, cid: &Cid) -> bool {
        let mut ledger = self.ledger();
        let cancelled = cancel_locked(&mut ledger, cid);
        if cancelled {
            debug!("Cancelled want {}", cid);
        }
        cancelled
    }

    /// Cancel `cid` only if no live handle still waits for it
    fn release(&self, cid: &Cid) {
        let mut ledger = self.ledger();

        let Some(want) = ledger.local_wants.get_mut(cid) else {
            return;
        };
        want.prune();

        if want.waiters.is_empty() {
            cancel_locked(&mut ledger, cid);
            debug!("Released want {}", cid);
        }
    }

    /// Wait for `cid` at most `timeout`; on expiry the want is withdrawn
    /// unless another caller is still waiting for it.
    pub async fn want_timeout(&self, cid: Cid, timeout: Duration) -> Result<Bytes> {
        tokio::time::timeout(timeout, self.want(cid))
            .await
            .map_err(|_| BitswapError::Timeout(timeout))?
    }

    /// Read `cid` from the blockstore, falling back to asking peers
    pub async fn get(&self, cid: &Cid) -> Result<Bytes> {
        match self.inner.store.get(cid).await {
            Ok(Some(data)) => return Ok(data),
            Ok(None) => {}
            Err(e) => warn!("Blockstore read for {} failed, asking peers: {}", cid, e),
        }

        self.want(*cid).await
    }

    /// Store a block locally, then hand it to anyone waiting for it
    pub async fn put(&self, data: Bytes, codec: u64) -> Result<Cid> {
        let cid = self.inner.store.put(data.clone(), codec).await?;

        let mut touched = Touched::new();
        self.block_acquired(&Block::from_parts(cid, data), None, &mut touched);
        self.flush(&touched);

        Ok(cid)
    }

    /// Cancel every local want and close every connection.
    /// Later wants resolve as cancelled immediately.
    pub fn shutdown(&self) {
        let mut ledger = self.ledger();
        ledger.shut_down = true;

        let wants = std::mem::take(&mut ledger.local_wants);
        let peers: Vec<PeerId> = ledger.peers.keys().copied().collect();
        for peer_id in &peers {
            ledger.remove_peer(peer_id);
        }

        info!(
            "Engine shut down ({} wants cancelled, {} peers dropped)",
            wants.len(),
            peers.len()
        );
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.ledger().peers.keys().copied().collect()
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.ledger().peers.contains_key(peer_id)
    }

    pub fn peer_address(&self, peer_id: &PeerId) -> Option<SocketAddr> {
        self.ledger().peers.get(peer_id).map(|p| p.remote_addr)
    }

    /// What `peer_id` currently wants from us
    pub fn peer_wantlist(&self, peer_id: &PeerId) -> Option<HashMap<Cid, PeerWant>> {
        self.ledger().peers.get(peer_id).map(|p| p.wants.clone())
    }

    /// CIDs this node is waiting for
    pub fn local_wants(&self) -> Vec<Cid> {
        self.ledger().local_wants.keys().copied().collect()
    }

    pub fn is_wanted(&self, cid: &Cid) -> bool {
        self.ledger().local_wants.contains_key(cid)
    }

    pub fn stats(&self) -> EngineStats {
        let ledger = self.ledger();
        EngineStats {
            peers: ledger.peers.len(),
            connections: ledger.peers.values().map(|p| p.connections.len()).sum(),
            local_wants: ledger.local_wants.len(),
            peer_wants: ledger.peers.values().map(|p| p.wants.len()).sum(),
        }
    }
}

fn cancel_locked(ledger: &mut Ledger, cid: &Cid) -> bool {
    let Some(want) = ledger.local_wants.remove(cid) else {
        return false;
    };

    for peer_id in &want.sent_to {
        if let Some(conn) = ledger.peers.get_mut(peer_id).and_then(|p| p.primary_mut()) {
            conn.enqueue_want(WantEntry::cancel(*cid));
            conn.flush();
        }
    }

    // Dropping the senders fails every handle with Cancelled
    drop(want);
    true
}

/// Queue the reply to one remote want after the blockstore lookup.
/// Returns the connection written to, if any.
fn respond(
    peer: &mut PeerLedger,
    origin: ConnectionId,
    cid: Cid,
    found: Option<Bytes>,
) -> Option<ConnectionId> {
    // The want may have changed while the store was being read
    let want = *peer.wants.get(&cid)?;

    let conn = if peer.is_open(origin) {
        peer.connection_mut(origin)
    } else {
        peer.primary_mut()
    }?;
    let conn_id = conn.id();

    // A block that can't fit in any message counts as absent
    let block = found
        .map(|data| Block::from_parts(cid, data))
        .filter(|block| {
            let sendable = conn.can_send(block);
            if !sendable {
                warn!("Block {} ({} bytes) too large to send", cid, block.size());
            }
            sendable
        });

    let reply = match (want.want_type, block) {
        (WantType::Block, Some(block)) => Reply::Block(block),
        (WantType::Have, Some(_)) => Reply::Presence(BlockPresence::have(cid)),
        (_, None) if want.send_dont_have => Reply::Presence(BlockPresence::dont_have(cid)),
        // Stays pending so a later arrival can be pushed
        (_, None) => return None,
    };

    let sent_block = matches!(reply, Reply::Block(_));
    match reply {
        Reply::Block(block) => conn.enqueue_block(block),
        Reply::Presence(presence) => conn.enqueue_presence(presence),
    }

    if sent_block {
        peer.wants.remove(&cid);
    }

    Some(conn_id)
}

#[cfg(test)]
mod tests;
