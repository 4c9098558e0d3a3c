mod fs;
mod memory;

pub use fs::FsBlockstore;
pub use memory::MemoryBlockstore;

use crate::block::cid_of;
use crate::error::Result;
use bytes::Bytes;
use cid::Cid;
use std::future::Future;

/// Content-addressed block storage consumed by the engine.
///
/// Implementations must be idempotent per CID: storing the same block twice
/// leaves observable state unchanged.
pub trait Blockstore: Send + Sync + 'static {
    /// Read a block; `None` on miss, `Err` on I/O failure
    fn get(&self, cid: &Cid) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Store bytes under a CID the caller has already verified
    fn put_keyed(&self, cid: &Cid, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    fn has(&self, cid: &Cid) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(cid).await?.is_some()) }
    }

    /// Hash `data` (sha2-256, CIDv1) under `codec` and store it
    fn put(&self, data: Bytes, codec: u64) -> impl Future<Output = Result<Cid>> + Send {
        async move {
            let cid = cid_of(&data, codec);
            self.put_keyed(&cid, data).await?;
            Ok(cid)
        }
    }
}
