use crate::message::{WantEntry, WantType, Wantlist};
use crate::peer::{Connection, ConnectionId, PeerId};
use bytes::Bytes;
use cid::Cid;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::debug;

/// What a remote peer asked us for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerWant {
    pub priority: i32,
    pub want_type: WantType,
    pub send_dont_have: bool,
}

/// Bookkeeping for one remote peer: its open streams and its wantlist
pub(crate) struct PeerLedger {
    pub remote_addr: SocketAddr,
    /// In registration order; the first open one carries broadcasts
    pub connections: Vec<Connection>,
    pub wants: HashMap<Cid, PeerWant>,
}

impl PeerLedger {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            connections: Vec::new(),
            wants: HashMap::new(),
        }
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id() == id)
    }

    /// The stream used for messages not tied to an inbound one
    pub fn primary_mut(&mut self) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.is_open())
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections.iter().any(|c| c.id() == id && c.is_open())
    }

    /// Apply an inbound wantlist to this peer's ledger.
    ///
    /// Returns the entries to try to satisfy from the blockstore, one per CID
    /// with the last occurrence winning. CIDs whose last entry was a cancel are
    /// not returned.
    pub fn apply_wantlist(&mut self, wantlist: &Wantlist) -> Vec<WantEntry> {
        if wantlist.full {
            self.wants.clear();
        }

        let mut order = Vec::new();
        let mut latest: HashMap<Cid, &WantEntry> = HashMap::new();

        for entry in &wantlist.entries {
            if entry.cancel {
                // Cancelling something not wanted is a no-op
                self.wants.remove(&entry.cid);
            } else {
                self.wants.insert(
                    entry.cid,
                    PeerWant {
                        priority: entry.priority,
                        want_type: entry.want_type,
                        send_dont_have: entry.send_dont_have,
                    },
                );
            }

            if latest.insert(entry.cid, entry).is_none() {
                order.push(entry.cid);
            }
        }

        order
            .into_iter()
            .filter_map(|cid| latest.get(&cid).copied())
            .filter(|entry| !entry.cancel)
            .cloned()
            .collect()
    }

    /// Detach and close every stream
    pub fn close_all(&mut self) {
        for connection in &mut self.connections {
            connection.close();
        }
        self.connections.clear();
    }
}

/// One CID this node is waiting for
pub(crate) struct LocalWant {
    pub priority: i32,
    pub waiters: Vec<oneshot::Sender<Bytes>>,
    /// Peers that were sent a WANT for this CID
    pub sent_to: HashSet<PeerId>,
}

impl LocalWant {
    pub fn new(priority: i32) -> Self {
        Self {
            priority,
            waiters: Vec::new(),
            sent_to: HashSet::new(),
        }
    }

    /// Forget waiters whose handle was dropped
    pub fn prune(&mut self) {
        self.waiters.retain(|waiter| !waiter.is_closed());
    }
}

/// All mutable engine state, guarded by a single lock
#[derive(Default)]
pub(crate) struct Ledger {
    pub peers: HashMap<PeerId, PeerLedger>,
    pub local_wants: HashMap<Cid, LocalWant>,
    pub shut_down: bool,
}

impl Ledger {
    /// Remove a peer and everything we know about it
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> bool {
        let Some(mut peer) = self.peers.remove(peer_id) else {
            return false;
        };

        peer.close_all();
        for want in self.local_wants.values_mut() {
            want.sent_to.remove(peer_id);
        }

        debug!(
            "Removed peer {} ({} pending wants discarded)",
            peer_id,
            peer.wants.len()
        );
        true
    }
}
