use super::Blockstore;
use crate::block::Block;
use crate::error::{BitswapError, Result};
use bytes::Bytes;
use cid::Cid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Blockstore keeping one file per block under a directory.
///
/// Files are named after the CID's string form and written through a temporary
/// file + rename, so a reader never sees a partial block.
#[derive(Debug, Clone)]
pub struct FsBlockstore {
    root: PathBuf,
}

impl FsBlockstore {
    /// Open (creating if needed) a blockstore rooted at `root`
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create store directory
        fs::create_dir_all(&root).await?;

        info!("Blockstore opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, cid: &Cid) -> PathBuf {
        self.root.join(cid.to_string())
    }

    async fn exists(&self, cid: &Cid) -> Result<bool> {
        fs::try_exists(self.block_path(cid))
            .await
            .map_err(|e| BitswapError::StoreError(format!("Failed to stat {}: {}", cid, e)))
    }

    async fn write_through(&self, tmp: &Path, path: &Path, cid: &Cid, data: &[u8]) -> Result<()> {
        fs::write(tmp, data)
            .await
            .map_err(|e| BitswapError::StoreError(format!("Failed to write {}: {}", cid, e)))?;
        fs::rename(tmp, path)
            .await
            .map_err(|e| BitswapError::StoreError(format!("Failed to commit {}: {}", cid, e)))
    }
}

impl Blockstore for FsBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>> {
        let data = match fs::read(self.block_path(cid)).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BitswapError::StoreError(format!("Failed to read {}: {}", cid, e)))
            }
        };

        // Files can be damaged behind our back
        let block = Block::from_parts(*cid, data);
        if !block.verify() {
            warn!("Block {} on disk doesn't match its CID", cid);
            return Err(BitswapError::StoreError(format!("Corrupt block {}", cid)));
        }
        Ok(Some(block.into_data()))
    }

    async fn put_keyed(&self, cid: &Cid, data: Bytes) -> Result<()> {
        let path = self.block_path(cid);

        // Content-addressed: an existing file already holds these bytes
        if self.exists(cid).await? {
            debug!("Block {} already stored", cid);
            return Ok(());
        }

        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", cid, rand::random::<u32>()));

        if let Err(e) = self.write_through(&tmp, &path, cid, &data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        debug!("Stored block {} ({} bytes)", cid, data.len());
        Ok(())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        self.exists(cid).await
    }
}
