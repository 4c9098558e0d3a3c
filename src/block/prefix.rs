use crate::error::{BitswapError, Result};
use cid::multihash::Multihash;
use cid::{Cid, Version};
use multihash_codetable::{Code, MultihashDigest};

/// Multihash code of the identity "hash", which embeds data instead of hashing it
const IDENTITY: u64 = 0x00;

/// Everything in a CID except the digest.
///
/// Blocks travel as `(prefix, bytes)`; the receiver re-hashes the bytes to
/// recover the CID.
/// Format: <version><codec><multihash type><multihash length>, each an unsigned varint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidPrefix {
    pub version: Version,
    pub codec: u64,
    pub mh_type: u64,
    pub mh_len: u8,
}

impl CidPrefix {
    pub fn from_cid(cid: &Cid) -> Self {
        Self {
            version: cid.version(),
            codec: cid.codec(),
            mh_type: cid.hash().code(),
            mh_len: cid.hash().size(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        let mut scratch = unsigned_varint::encode::u64_buffer();

        for value in [
            u64::from(self.version),
            self.codec,
            self.mh_type,
            self.mh_len as u64,
        ] {
            buf.extend_from_slice(unsigned_varint::encode::u64(value, &mut scratch));
        }

        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (version, rest) = read_varint(data)?;
        let (codec, rest) = read_varint(rest)?;
        let (mh_type, rest) = read_varint(rest)?;
        let (mh_len, _) = read_varint(rest)?;

        let version = Version::try_from(version)
            .map_err(|_| BitswapError::InvalidCid(format!("unknown CID version {}", version)))?;
        let mh_len = u8::try_from(mh_len)
            .map_err(|_| BitswapError::InvalidCid(format!("multihash length {} too large", mh_len)))?;

        Ok(Self {
            version,
            codec,
            mh_type,
            mh_len,
        })
    }

    /// Hash `data` as this prefix describes and build the resulting CID
    pub fn to_cid(&self, data: &[u8]) -> Result<Cid> {
        if self.mh_type == IDENTITY {
            return Err(BitswapError::InvalidCid(
                "identity multihash not accepted for blocks".to_string(),
            ));
        }

        let code = Code::try_from(self.mh_type).map_err(|_| {
            BitswapError::InvalidCid(format!("unsupported hash function 0x{:x}", self.mh_type))
        })?;

        let full = code.digest(data);
        let len = self.mh_len as usize;
        if len > full.digest().len() {
            return Err(BitswapError::InvalidCid(format!(
                "multihash length {} exceeds digest size {}",
                len,
                full.digest().len()
            )));
        }

        // Prefixes may ask for a truncated digest
        let hash = Multihash::<64>::wrap(self.mh_type, &full.digest()[..len])
            .map_err(|e| BitswapError::InvalidCid(e.to_string()))?;

        Cid::new(self.version, self.codec, hash).map_err(|e| BitswapError::InvalidCid(e.to_string()))
    }
}

fn read_varint(data: &[u8]) -> Result<(u64, &[u8])> {
    unsigned_varint::decode::u64(data)
        .map_err(|e| BitswapError::InvalidCid(format!("malformed CID prefix: {}", e)))
}
