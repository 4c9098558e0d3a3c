use super::{ConnectionId, ConnectionState, PeerId};
use crate::block::Block;
use crate::message::{BitswapCodec, BlockPresence, Message, WantEntry};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Encoded frames waiting to be written to the stream
pub type OutboundFrames = mpsc::Receiver<Bytes>;

/// Frames a stream may have queued before the peer is considered stalled
pub const OUTBOUND_QUEUE_FRAMES: usize = 32;

/// Headroom for the wantlist wrapper and field tags of a batch
const FRAME_OVERHEAD: usize = 64;

/// Field tags, lengths and prefix of one payload entry, CID excluded
const BLOCK_ENTRY_OVERHEAD: usize = 16;

fn block_len(block: &Block) -> usize {
    block.size() + block.cid().encoded_len() + BLOCK_ENTRY_OVERHEAD
}

/// Whether `block` fits in a message of at most `max_message_size` bytes
pub fn fits_in_message(block: &Block, max_message_size: usize) -> bool {
    block_len(block) <= max_message_size.saturating_sub(FRAME_OVERHEAD)
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound side of one stream to a peer.
///
/// Entries are buffered until `flush`, which encodes them into frames and
/// hands the frames to the stream's writer task.
pub struct Connection {
    id: ConnectionId,
    peer_id: PeerId,
    remote_addr: SocketAddr,
    state: ConnectionState,
    codec: BitswapCodec,
    wants: Vec<WantEntry>,
    blocks: Vec<Block>,
    presences: Vec<BlockPresence>,
    outbound: Option<mpsc::Sender<Bytes>>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection in the `Opening` state.
    ///
    /// The returned receiver yields every frame flushed on this connection.
    /// At most `OUTBOUND_QUEUE_FRAMES` frames are held; a flush that finds
    /// the queue full closes the connection.
    pub fn new(peer_id: PeerId, remote_addr: SocketAddr, max_message_size: usize) -> (Self, OutboundFrames) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_FRAMES);
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));

        let connection = Self {
            id,
            peer_id,
            remote_addr,
            state: ConnectionState::Opening,
            codec: BitswapCodec::new(max_message_size),
            wants: Vec::new(),
            blocks: Vec::new(),
            presences: Vec::new(),
            outbound: Some(tx),
            closed: CancellationToken::new(),
        };

        (connection, rx)
    }

    pub(crate) fn open(&mut self) {
        if self.state == ConnectionState::Opening {
            self.state = ConnectionState::Open;
            debug!("Connection {} to {} open", self.id, self.peer_id);
        }
    }

    pub fn enqueue_want(&mut self, entry: WantEntry) {
        if self.accepts_entries() {
            self.wants.push(entry);
        }
    }

    pub fn enqueue_block(&mut self, block: Block) {
        if self.accepts_entries() {
            self.blocks.push(block);
        }
    }

    pub fn enqueue_presence(&mut self, presence: BlockPresence) {
        if self.accepts_entries() {
            self.presences.push(presence);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.wants.is_empty() || !self.blocks.is_empty() || !self.presences.is_empty()
    }

    /// Send everything buffered, returning the number of messages written.
    ///
    /// Buffers are split across as many messages as needed to respect the
    /// maximum message size. Nothing is sent unless the connection is open.
    pub fn flush(&mut self) -> usize {
        if self.state != ConnectionState::Open || !self.has_pending() {
            return 0;
        }

        let mut sent = 0;
        for message in self.take_batches() {
            let mut frame = BytesMut::new();
            if let Err(e) = self.codec.encode(message, &mut frame) {
                warn!("Dropping outbound message to {}: {}", self.peer_id, e);
                continue;
            }

            let Some(outbound) = &self.outbound else {
                break;
            };

            match outbound.try_send(frame.freeze()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Peer {} not reading connection {}, closing it",
                        self.peer_id, self.id
                    );
                    self.abort();
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    // Writer is gone; the stream close path removes us
                    debug!("Writer for connection {} to {} closed", self.id, self.peer_id);
                    self.state = ConnectionState::Closing;
                    break;
                }
            }

            sent += 1;
        }

        sent
    }

    /// Discard anything buffered and release the stream
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.state = ConnectionState::Closing;
        self.wants.clear();
        self.blocks.clear();
        self.presences.clear();

        // Dropping the sender ends the writer task, which closes the stream
        self.outbound.take();
        self.closed.cancel();
        self.state = ConnectionState::Closed;

        debug!("Connection {} to {} closed", self.id, self.peer_id);
    }

    /// Give up on a stalled stream; the stream's tasks see `closed_token`
    /// and tear it down
    fn abort(&mut self) {
        self.state = ConnectionState::Closing;
        self.wants.clear();
        self.blocks.clear();
        self.presences.clear();
        self.outbound.take();
        self.closed.cancel();
    }

    /// Whether `block` can ever be sent on this connection
    pub fn can_send(&self, block: &Block) -> bool {
        fits_in_message(block, self.codec.max_message_size())
    }

    /// Cancelled once the connection is closed or aborted
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn accepts_entries(&self) -> bool {
        matches!(self.state, ConnectionState::Opening | ConnectionState::Open)
    }

    /// Drain the buffers into size-bounded messages.
    /// Wants come first, then blocks, then presences.
    fn take_batches(&mut self) -> Vec<Message> {
        let budget = self.codec.max_message_size().saturating_sub(FRAME_OVERHEAD);
        let mut batcher = Batcher::new(budget);

        for entry in std::mem::take(&mut self.wants) {
            let len = entry.estimated_len();
            batcher.reserve(len);
            batcher.current.wantlist.entries.push(entry);
        }

        for block in std::mem::take(&mut self.blocks) {
            let len = block_len(&block);
            batcher.reserve(len);
            batcher.current.blocks.push(block);
        }

        for presence in std::mem::take(&mut self.presences) {
            let len = presence.estimated_len();
            batcher.reserve(len);
            batcher.current.block_presences.push(presence);
        }

        batcher.finish()
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

struct Batcher {
    budget: usize,
    used: usize,
    current: Message,
    done: Vec<Message>,
}

impl Batcher {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            current: Message::default(),
            done: Vec::new(),
        }
    }

    /// Start a new message if `len` more bytes would overflow the current one
    fn reserve(&mut self, len: usize) {
        if self.used + len > self.budget && !self.current.is_empty() {
            self.done.push(std::mem::take(&mut self.current));
            self.used = 0;
        }
        self.used += len;
    }

    fn finish(mut self) -> Vec<Message> {
        if !self.current.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}
