mod prefix;

pub use prefix::CidPrefix;

use crate::error::{BitswapError, Result};
use bytes::Bytes;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use std::fmt;

/// Raw binary codec
pub const RAW: u64 = 0x55;
/// MerkleDAG protobuf codec
pub const DAG_PB: u64 = 0x70;
/// MerkleDAG CBOR codec
pub const DAG_CBOR: u64 = 0x71;

/// Multihash code for SHA2-256
pub const SHA2_256: u64 = 0x12;

/// Compute the CIDv1 (sha2-256) of `data` under `codec`
pub fn cid_of(data: &[u8], codec: u64) -> Cid {
    Cid::new_v1(codec, Code::Sha2_256.digest(data))
}

/// An immutable unit of bytes keyed by its CID
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Hash `data` with sha2-256 and wrap it in a CIDv1 with the given codec
    pub fn new(data: impl Into<Bytes>, codec: u64) -> Self {
        let data = data.into();
        let cid = cid_of(&data, codec);
        Self { cid, data }
    }

    /// Pair a CID with bytes without hashing.
    ///
    /// Used for data read back from a blockstore, which is keyed by content.
    pub fn from_parts(cid: Cid, data: Bytes) -> Self {
        Self { cid, data }
    }

    /// Rebuild a block received on the wire from its CID prefix
    pub fn from_prefix(prefix: &CidPrefix, data: Bytes) -> Result<Self> {
        let cid = prefix.to_cid(&data)?;
        Ok(Self { cid, data })
    }

    /// Build a legacy Bitswap 1.0 block (CIDv0, dag-pb, sha2-256)
    pub fn legacy(data: Bytes) -> Result<Self> {
        let cid = Cid::new_v0(Code::Sha2_256.digest(&data))
            .map_err(|e| BitswapError::InvalidCid(e.to_string()))?;
        Ok(Self { cid, data })
    }

    /// Check that the CID actually matches the bytes
    pub fn verify(&self) -> bool {
        CidPrefix::from_cid(&self.cid)
            .to_cid(&self.data)
            .map(|cid| cid == self.cid)
            .unwrap_or(false)
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn prefix(&self) -> CidPrefix {
        CidPrefix::from_cid(&self.cid)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("cid", &self.cid.to_string())
            .field("size", &self.size())
            .finish()
    }
}
