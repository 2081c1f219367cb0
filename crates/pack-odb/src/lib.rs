//! Object store interface consumed by the pack indexer.
//!
//! The indexer only needs three operations from the store it publishes
//! into: open an object by id (to find thin-pack bases and detect
//! collisions), probe existence, and make a freshly published pack
//! visible. [`MemoryStore`] is a self-contained implementation used by
//! tests and the CLI.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use pack_format::pack::PackFile;
use pack_hash::hasher::Hasher;
use pack_hash::{HashError, ObjectId};
use pack_object::ObjectType;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("corrupt object {oid}: {reason}")]
    Corrupt { oid: ObjectId, reason: String },

    #[error(transparent)]
    Pack(#[from] pack_format::PackError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read-side object storage.
pub trait ObjectStore: Send + Sync {
    /// Load an object's type and payload, or `None` when absent.
    fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError>;

    /// Cheap existence probe.
    fn contains(&self, oid: &ObjectId) -> bool;

    /// Make a newly published pack visible to subsequent lookups.
    fn open_pack(&self, pack_path: &Path, idx_path: &Path) -> Result<(), OdbError>;
}

/// In-memory store: a map of loose objects plus any opened packs.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectId, (ObjectType, Vec<u8>)>>,
    packs: RwLock<Vec<PackFile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object, returning its computed id.
    pub fn insert(&self, kind: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError> {
        let oid = Hasher::hash_object(kind.as_str(), data)?;
        self.objects
            .write()
            .expect("objects lock")
            .insert(oid, (kind, data.to_vec()));
        Ok(oid)
    }

    /// Add an object under a caller-chosen id, bypassing hashing.
    ///
    /// Exists so tests can stage colliding store content; normal writes go
    /// through [`insert`](MemoryStore::insert).
    pub fn insert_with_id(&self, oid: ObjectId, kind: ObjectType, data: &[u8]) {
        self.objects
            .write()
            .expect("objects lock")
            .insert(oid, (kind, data.to_vec()));
    }

    /// Number of packs opened into this store.
    pub fn pack_count(&self) -> usize {
        self.packs.read().expect("packs lock").len()
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        if let Some((kind, data)) = self.objects.read().expect("objects lock").get(oid) {
            return Ok(Some((*kind, data.clone())));
        }
        for pack in self.packs.read().expect("packs lock").iter() {
            if let Some(found) = pack.read_object(oid)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn contains(&self, oid: &ObjectId) -> bool {
        if self.objects.read().expect("objects lock").contains_key(oid) {
            return true;
        }
        self.packs
            .read()
            .expect("packs lock")
            .iter()
            .any(|p| p.contains(oid))
    }

    fn open_pack(&self, pack_path: &Path, idx_path: &Path) -> Result<(), OdbError> {
        let pack = PackFile::open(pack_path, idx_path)?;
        self.packs.write().expect("packs lock").push(pack);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_read_back() {
        let store = MemoryStore::new();
        let oid = store.insert(ObjectType::Blob, b"contents").unwrap();
        assert!(store.contains(&oid));

        let (kind, data) = store.read(&oid).unwrap().unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(data, b"contents");
    }

    #[test]
    fn insert_computes_canonical_id() {
        let store = MemoryStore::new();
        let oid = store.insert(ObjectType::Blob, b"abc").unwrap();
        assert_eq!(oid.to_hex(), "f2ba8f84ab5c1bce84a7b441cb1959cfc7093b7f");
    }

    #[test]
    fn missing_object_reads_none() {
        let store = MemoryStore::new();
        let absent = ObjectId::from_hex("0000000000000000000000000000000000000042").unwrap();
        assert!(!store.contains(&absent));
        assert!(store.read(&absent).unwrap().is_none());
    }

    #[test]
    fn insert_with_id_bypasses_hashing() {
        let store = MemoryStore::new();
        let fake = ObjectId::from_hex("00000000000000000000000000000000000000aa").unwrap();
        store.insert_with_id(fake, ObjectType::Blob, b"not the real content");
        let (_, data) = store.read(&fake).unwrap().unwrap();
        assert_eq!(data, b"not the real content");
    }
}
