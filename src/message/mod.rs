mod codec;
pub mod pb;

pub use codec::BitswapCodec;

use crate::block::{Block, CidPrefix};
use crate::error::{BitswapError, Result};
use cid::Cid;

/// What a peer asks for with a want entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WantType {
    /// Send me the block
    Block,
    /// Tell me whether you have the block
    Have,
}

/// Presence hint answering a HAVE want
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceType {
    Have,
    DontHave,
}

/// A single wantlist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantEntry {
    pub cid: Cid,
    pub priority: i32,
    pub want_type: WantType,
    pub send_dont_have: bool,
    /// Retracts any earlier want for `cid` from the same peer
    pub cancel: bool,
}

impl WantEntry {
    pub fn block(cid: Cid, priority: i32) -> Self {
        Self {
            cid,
            priority,
            want_type: WantType::Block,
            send_dont_have: false,
            cancel: false,
        }
    }

    pub fn have(cid: Cid, priority: i32) -> Self {
        Self {
            want_type: WantType::Have,
            ..Self::block(cid, priority)
        }
    }

    pub fn cancel(cid: Cid) -> Self {
        Self {
            cancel: true,
            ..Self::block(cid, 0)
        }
    }

    pub fn with_send_dont_have(mut self, send_dont_have: bool) -> Self {
        self.send_dont_have = send_dont_have;
        self
    }

    /// Rough size on the wire, used to split outbound batches
    pub(crate) fn estimated_len(&self) -> usize {
        self.cid.encoded_len() + 16
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wantlist {
    /// When set, `entries` replace the sender's previous wantlist
    pub full: bool,
    pub entries: Vec<WantEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPresence {
    pub cid: Cid,
    pub presence: PresenceType,
}

impl BlockPresence {
    pub fn have(cid: Cid) -> Self {
        Self {
            cid,
            presence: PresenceType::Have,
        }
    }

    pub fn dont_have(cid: Cid) -> Self {
        Self {
            cid,
            presence: PresenceType::DontHave,
        }
    }

    pub(crate) fn estimated_len(&self) -> usize {
        self.cid.encoded_len() + 8
    }
}

/// The on-wire unit exchanged between peers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub wantlist: Wantlist,
    pub blocks: Vec<Block>,
    pub block_presences: Vec<BlockPresence>,
    /// Advisory backpressure hint
    pub pending_bytes: i32,
}

impl Message {
    /// A message carrying nothing worth sending
    pub fn is_empty(&self) -> bool {
        !self.wantlist.full
            && self.wantlist.entries.is_empty()
            && self.blocks.is_empty()
            && self.block_presences.is_empty()
    }
}

impl From<&Message> for pb::Message {
    fn from(message: &Message) -> Self {
        use pb::message::wantlist::{Entry, WantType as ProtoWantType};
        use pb::message::BlockPresenceType;

        let wantlist = if message.wantlist.full || !message.wantlist.entries.is_empty() {
            let entries = message
                .wantlist
                .entries
                .iter()
                .map(|entry| Entry {
                    block: entry.cid.to_bytes(),
                    priority: entry.priority,
                    cancel: entry.cancel,
                    want_type: match entry.want_type {
                        WantType::Block => ProtoWantType::Block as i32,
                        WantType::Have => ProtoWantType::Have as i32,
                    },
                    send_dont_have: entry.send_dont_have,
                })
                .collect();

            Some(pb::message::Wantlist {
                entries,
                full: message.wantlist.full,
            })
        } else {
            None
        };

        let payload = message
            .blocks
            .iter()
            .map(|block| pb::message::Block {
                prefix: block.prefix().to_bytes(),
                data: block.data().clone(),
            })
            .collect();

        let block_presences = message
            .block_presences
            .iter()
            .map(|presence| pb::message::BlockPresence {
                cid: presence.cid.to_bytes(),
                r#type: match presence.presence {
                    PresenceType::Have => BlockPresenceType::Have as i32,
                    PresenceType::DontHave => BlockPresenceType::DontHave as i32,
                },
            })
            .collect();

        pb::Message {
            wantlist,
            blocks: Vec::new(),
            payload,
            block_presences,
            pending_bytes: message.pending_bytes,
        }
    }
}

impl TryFrom<pb::Message> for Message {
    type Error = BitswapError;

    fn try_from(proto: pb::Message) -> Result<Self> {
        use pb::message::wantlist::WantType as ProtoWantType;
        use pb::message::BlockPresenceType;

        let mut wantlist = Wantlist::default();
        if let Some(proto_wantlist) = proto.wantlist {
            wantlist.full = proto_wantlist.full;

            for entry in proto_wantlist.entries {
                let want_type = match ProtoWantType::try_from(entry.want_type) {
                    Ok(ProtoWantType::Block) => WantType::Block,
                    Ok(ProtoWantType::Have) => WantType::Have,
                    Err(_) => {
                        return Err(BitswapError::ProtocolError(format!(
                            "Unknown want type: {}",
                            entry.want_type
                        )))
                    }
                };

                wantlist.entries.push(WantEntry {
                    cid: Cid::try_from(entry.block.as_slice())?,
                    priority: entry.priority,
                    want_type,
                    send_dont_have: entry.send_dont_have,
                    cancel: entry.cancel,
                });
            }
        }

        let mut blocks = Vec::with_capacity(proto.blocks.len() + proto.payload.len());
        for data in proto.blocks {
            blocks.push(Block::legacy(data)?);
        }
        for block in proto.payload {
            let prefix = CidPrefix::from_bytes(&block.prefix)?;
            blocks.push(Block::from_prefix(&prefix, block.data)?);
        }

        let mut block_presences = Vec::with_capacity(proto.block_presences.len());
        for presence in proto.block_presences {
            let kind = match BlockPresenceType::try_from(presence.r#type) {
                Ok(BlockPresenceType::Have) => PresenceType::Have,
                Ok(BlockPresenceType::DontHave) => PresenceType::DontHave,
                Err(_) => {
                    return Err(BitswapError::ProtocolError(format!(
                        "Unknown block presence type: {}",
                        presence.r#type
                    )))
                }
            };

            block_presences.push(BlockPresence {
                cid: Cid::try_from(presence.cid.as_slice())?,
                presence: kind,
            });
        }

        Ok(Message {
            wantlist,
            blocks,
            block_presences,
            pending_bytes: proto.pending_bytes,
        })
    }
}
