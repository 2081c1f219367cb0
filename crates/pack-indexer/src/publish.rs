//! Atomic publication of the finished pack and index.
//!
//! The final name is the digest over the sorted object list, so identical
//! content always publishes to identical paths. Rename order is pack
//! first, then index; any failure unwinds whatever already moved and
//! releases the hold before the error surfaces.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use pack_hash::hasher::Hasher;
use pack_hash::ObjectId;
use pack_odb::ObjectStore;
use pack_utils::lockfile::PackLock;

use crate::indexer::PackIndexer;
use crate::IndexError;

/// What a completed indexing run installed.
#[derive(Debug)]
pub struct IndexOutcome {
    /// Final `.pack` path.
    pub pack_path: PathBuf,
    /// Final `.idx` path.
    pub index_path: PathBuf,
    /// Digest over the sorted object ids; the artifacts' base name.
    pub name: ObjectId,
    /// Objects in the published pack, appended bases included.
    pub objects: usize,
    /// The exclusive hold, when a lock message was supplied.
    pub keep: Option<PackLock>,
}

impl<R: Read> PackIndexer<'_, R> {
    /// Move the staged artifacts into their final names and open the pack
    /// through the store.
    pub(crate) fn publish(self) -> Result<Option<IndexOutcome>, IndexError> {
        let name = self.compute_name()?;
        let pack_path = self.dest_dir.join(format!("pack-{}.pack", name.to_hex()));
        let index_path = self.dest_dir.join(format!("pack-{}.idx", name.to_hex()));

        fs::create_dir_all(&self.dest_dir)?;
        if pack_path.exists() {
            // Same objects, same pack. Nothing to install.
            return Ok(None);
        }

        let mut keep = match &self.opts.lock_message {
            Some(message) => Some(PackLock::acquire(&pack_path, message)?),
            None => None,
        };

        let objects = self.entries.len();
        let PackIndexer { input, tmp_idx, store, .. } = self;
        let tmp_pack = input.into_pack();

        if let Err(e) = tmp_pack.persist(&pack_path) {
            if let Some(lock) = keep.take() {
                let _ = lock.unlock();
            }
            return Err(e.into());
        }
        if let Err(e) = tmp_idx.persist(&index_path) {
            let _ = fs::remove_file(&pack_path);
            if let Some(lock) = keep.take() {
                let _ = lock.unlock();
            }
            return Err(e.into());
        }
        if let Err(e) = store.open_pack(&pack_path, &index_path) {
            let _ = fs::remove_file(&index_path);
            let _ = fs::remove_file(&pack_path);
            if let Some(lock) = keep.take() {
                let _ = lock.unlock();
            }
            return Err(e.into());
        }

        Ok(Some(IndexOutcome {
            pack_path,
            index_path,
            name,
            objects,
            keep,
        }))
    }

    /// The canonical pack name: digest over every ObjectId in sorted
    /// order. The entry table is already sorted by the index writer.
    fn compute_name(&self) -> Result<ObjectId, IndexError> {
        let mut digest = Hasher::new();
        for entry in &self.entries {
            digest.update(entry.oid.as_bytes());
        }
        Ok(digest.finalize()?)
    }
}
