//! Reading finished `.pack` files through their index.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::bufread::ZlibDecoder;
use memmap2::Mmap;
use pack_hash::hasher::Hasher;
use pack_hash::ObjectId;
use pack_object::ObjectType;

use crate::entry::{parse_entry_header, PackEntryType};
use crate::index::PackIndex;
use crate::{
    PackError, MAX_DELTA_CHAIN_DEPTH, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_TRAILER_SIZE,
};

/// A memory-mapped pack file with its index.
pub struct PackFile {
    data: Mmap,
    index: PackIndex,
    pack_path: PathBuf,
    num_objects: u32,
}

impl PackFile {
    /// Open a pack file and its index.
    pub fn open(
        pack_path: impl AsRef<Path>,
        idx_path: impl AsRef<Path>,
    ) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&pack_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() < PACK_HEADER_SIZE + PACK_TRAILER_SIZE {
            return Err(PackError::InvalidHeader("file too small".into()));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidHeader("bad PACK signature".into()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != 2 && version != 3 {
            return Err(PackError::UnsupportedVersion(version));
        }
        let num_objects = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let index = PackIndex::open(idx_path)?;
        if index.num_objects() != num_objects {
            return Err(PackError::InvalidHeader(format!(
                "pack has {} objects but index has {}",
                num_objects,
                index.num_objects()
            )));
        }

        Ok(Self {
            data,
            index,
            pack_path,
            num_objects,
        })
    }

    /// Read an object by id. Returns `None` if it is not in this pack.
    pub fn read_object(
        &self,
        oid: &ObjectId,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, PackError> {
        match self.index.lookup(oid) {
            Some(offset) => self.read_at_offset(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Read the object whose record starts at `offset`.
    ///
    /// Delta chains are walked iteratively, innermost delta first, so deep
    /// chains cannot overflow the stack.
    pub fn read_at_offset(&self, offset: u64) -> Result<(ObjectType, Vec<u8>), PackError> {
        let mut chain: Vec<Vec<u8>> = Vec::new();
        let mut current_offset = offset;

        for _ in 0..MAX_DELTA_CHAIN_DEPTH {
            let entry = parse_entry_header(&self.data[current_offset as usize..], current_offset)?;
            let compressed = &self.data[entry.data_offset as usize..];
            let inflated = inflate(compressed, entry.inflated_size, current_offset)?;

            match entry.entry_type {
                PackEntryType::Whole(kind) => {
                    let mut data = inflated;
                    for delta in chain.iter().rev() {
                        data = crate::delta::apply_delta(&data, delta)?;
                    }
                    return Ok((kind, data));
                }
                PackEntryType::OfsDelta { base_offset } => {
                    chain.push(inflated);
                    current_offset = base_offset;
                }
                PackEntryType::RefDelta { base_oid } => {
                    chain.push(inflated);
                    current_offset = self
                        .index
                        .lookup(&base_oid)
                        .ok_or(PackError::MissingBase(base_oid))?;
                }
            }
        }

        Err(PackError::DeltaChainTooDeep {
            offset,
            max_depth: MAX_DELTA_CHAIN_DEPTH,
        })
    }

    /// Check if this pack contains the given id.
    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.lookup(oid).is_some()
    }

    /// Verify the pack trailer: the digest of every byte before it.
    pub fn verify_checksum(&self) -> Result<(), PackError> {
        let content = &self.data[..self.data.len() - PACK_TRAILER_SIZE];
        let stored =
            ObjectId::from_bytes(&self.data[self.data.len() - PACK_TRAILER_SIZE..])
                .map_err(PackError::Hash)?;

        let mut hasher = Hasher::new();
        hasher.update(content);
        let computed = hasher.finalize()?;

        if computed != stored {
            return Err(PackError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }
        Ok(())
    }

    /// Number of objects in this pack.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// The pack index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Path to the `.pack` file.
    pub fn path(&self) -> &Path {
        &self.pack_path
    }
}

/// Decompress one zlib stream with a declared inflated size.
fn inflate(compressed: &[u8], expected_size: u64, offset: u64) -> Result<Vec<u8>, PackError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut buf = Vec::with_capacity(expected_size.min(1 << 20) as usize);
    decoder
        .read_to_end(&mut buf)
        .map_err(|_| PackError::CorruptEntry(offset))?;
    if buf.len() as u64 != expected_size {
        return Err(PackError::CorruptEntry(offset));
    }
    Ok(buf)
}
