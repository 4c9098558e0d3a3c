use super::Blockstore;
use crate::error::Result;
use bytes::Bytes;
use cid::Cid;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Blockstore held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Cid, Bytes>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.is_empty()
    }
}

impl Blockstore for MemoryBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>> {
        Ok(self.blocks.read().await.get(cid).cloned())
    }

    async fn put_keyed(&self, cid: &Cid, data: Bytes) -> Result<()> {
        self.blocks.write().await.entry(*cid).or_insert(data);
        Ok(())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.read().await.contains_key(cid))
    }
}
