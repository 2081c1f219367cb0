//! Pack index reading and lookup (versions 1 and 2).
//!
//! The index maps ObjectId → pack offset through a 256-way fan-out table
//! and binary search. Version 1 interleaves `(offset, oid)` pairs after
//! the fan-out; version 2 (`\377tOc`) stores separate oid, CRC32, and
//! offset tables, with a 64-bit overflow table for offsets past 31 bits.
//! Both end with the pack digest and an index self-digest.

use std::path::{Path, PathBuf};

use memmap2::Mmap;
use pack_hash::{ObjectId, OID_RAW_LEN};

use crate::{PackError, IDX_SIGNATURE_V2};

const FANOUT_SIZE: usize = 256 * 4;
const TRAILER_SIZE: usize = 2 * OID_RAW_LEN;

/// A memory-mapped pack index.
pub struct PackIndex {
    data: Mmap,
    version: u32,
    num_objects: u32,
    /// Start of the fan-out table.
    fanout_offset: usize,
    /// v2: start of the sorted oid table. v1: start of the entry pairs.
    table_offset: usize,
    /// v2 only: start of the CRC32 table.
    crc_offset: usize,
    /// v2 only: start of the 31-bit offset table.
    offset32_offset: usize,
    /// v2 only: start of the 64-bit overflow table.
    offset64_offset: usize,
    idx_path: PathBuf,
}

impl PackIndex {
    /// Open a pack index file, detecting its version.
    pub fn open(idx_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let idx_path = idx_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&idx_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() < FANOUT_SIZE + TRAILER_SIZE {
            return Err(PackError::InvalidIndex("file too small".into()));
        }

        let (version, fanout_offset) = if data[0..4] == IDX_SIGNATURE_V2 {
            let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            if version != 2 {
                return Err(PackError::InvalidIndex(format!(
                    "unsupported version {version}"
                )));
            }
            (2, 8)
        } else {
            (1, 0)
        };

        let num_objects = {
            let pos = fanout_offset + 255 * 4;
            if pos + 4 > data.len() {
                return Err(PackError::InvalidIndex("truncated fanout".into()));
            }
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
        };

        let n = num_objects as usize;
        let table_offset = fanout_offset + FANOUT_SIZE;
        let (crc_offset, offset32_offset, offset64_offset, min_size) = match version {
            1 => {
                let min = table_offset + n * (4 + OID_RAW_LEN) + TRAILER_SIZE;
                (0, 0, 0, min)
            }
            _ => {
                let crc = table_offset + n * OID_RAW_LEN;
                let off32 = crc + n * 4;
                let off64 = off32 + n * 4;
                // The 64-bit table length is variable; the minimum excludes it.
                (crc, off32, off64, off64 + TRAILER_SIZE)
            }
        };
        if data.len() < min_size {
            return Err(PackError::InvalidIndex(format!(
                "file too small: {} < {min_size}",
                data.len()
            )));
        }

        Ok(Self {
            data,
            version,
            num_objects,
            fanout_offset,
            table_offset,
            crc_offset,
            offset32_offset,
            offset64_offset,
            idx_path,
        })
    }

    /// Look up an ObjectId, returning its pack offset.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        let (mut low, mut high) = self.fanout_range(oid.first_byte());
        let target = oid.as_bytes();

        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.offset_at(mid as u32)),
            }
        }
        None
    }

    /// The ObjectId at the given sorted position.
    pub fn oid_at(&self, index: u32) -> ObjectId {
        ObjectId::from_bytes(self.oid_bytes_at(index as usize)).expect("oid bytes in index")
    }

    /// The pack offset at the given sorted position.
    pub fn offset_at(&self, index: u32) -> u64 {
        match self.version {
            1 => {
                let pos = self.table_offset + index as usize * (4 + OID_RAW_LEN);
                u64::from(u32::from_be_bytes([
                    self.data[pos],
                    self.data[pos + 1],
                    self.data[pos + 2],
                    self.data[pos + 3],
                ]))
            }
            _ => {
                let pos = self.offset32_offset + index as usize * 4;
                let val = u32::from_be_bytes([
                    self.data[pos],
                    self.data[pos + 1],
                    self.data[pos + 2],
                    self.data[pos + 3],
                ]);
                if val & 0x8000_0000 != 0 {
                    let pos64 = self.offset64_offset + (val & 0x7fff_ffff) as usize * 8;
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&self.data[pos64..pos64 + 8]);
                    u64::from_be_bytes(raw)
                } else {
                    u64::from(val)
                }
            }
        }
    }

    /// The recorded CRC32 at the given sorted position. Version 1 indexes
    /// do not store CRCs.
    pub fn crc32_at(&self, index: u32) -> Option<u32> {
        if self.version == 1 {
            return None;
        }
        let pos = self.crc_offset + index as usize * 4;
        Some(u32::from_be_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ]))
    }

    /// Total number of objects in this index.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// Index format version (1 or 2).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Path to the index file.
    pub fn path(&self) -> &Path {
        &self.idx_path
    }

    /// Pack digest stored in the index trailer, pairing it with its pack.
    pub fn pack_checksum(&self) -> ObjectId {
        let start = self.data.len() - TRAILER_SIZE;
        ObjectId::from_bytes(&self.data[start..start + OID_RAW_LEN])
            .expect("checksum bytes in index trailer")
    }

    /// Iterate over `(ObjectId, offset)` pairs in sorted id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, u64)> + '_ {
        (0..self.num_objects).map(|i| (self.oid_at(i), self.offset_at(i)))
    }

    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let end = self.fanout_entry(first_byte) as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fanout_entry(first_byte - 1) as usize
        };
        (start, end)
    }

    fn fanout_entry(&self, index: u8) -> u32 {
        let pos = self.fanout_offset + index as usize * 4;
        u32::from_be_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ])
    }

    fn oid_bytes_at(&self, index: usize) -> &[u8] {
        let start = match self.version {
            1 => self.table_offset + index * (4 + OID_RAW_LEN) + 4,
            _ => self.table_offset + index * OID_RAW_LEN,
        };
        &self.data[start..start + OID_RAW_LEN]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pack_hash::hasher::Hasher;
    use std::io::Write;

    fn make_oid(first_byte: u8, suffix: u8) -> ObjectId {
        let mut bytes = [0u8; OID_RAW_LEN];
        bytes[0] = first_byte;
        bytes[19] = suffix;
        ObjectId::from_raw(bytes)
    }

    fn fanout_for(entries: &[(ObjectId, u64, u32)]) -> [u32; 256] {
        let mut fanout = [0u32; 256];
        for (oid, _, _) in entries {
            fanout[oid.first_byte() as usize] += 1;
        }
        for i in 1..256 {
            fanout[i] += fanout[i - 1];
        }
        fanout
    }

    fn finish_index(mut buf: Vec<u8>) -> Vec<u8> {
        buf.extend_from_slice(&[0u8; OID_RAW_LEN]); // fake pack checksum
        let mut hasher = Hasher::new();
        hasher.update(&buf);
        let checksum = hasher.finalize().unwrap();
        buf.extend_from_slice(checksum.as_bytes());
        buf
    }

    /// Build a v2 index in memory.
    fn build_v2(entries: &[(ObjectId, u64, u32)]) -> Vec<u8> {
        let mut entries = entries.to_vec();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut buf = Vec::new();
        buf.extend_from_slice(&IDX_SIGNATURE_V2);
        buf.extend_from_slice(&2u32.to_be_bytes());
        for count in fanout_for(&entries) {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for (oid, _, _) in &entries {
            buf.extend_from_slice(oid.as_bytes());
        }
        for (_, _, crc) in &entries {
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        let mut large = Vec::new();
        for (_, offset, _) in &entries {
            if *offset >= 0x8000_0000 {
                buf.extend_from_slice(&(0x8000_0000u32 | large.len() as u32).to_be_bytes());
                large.push(*offset);
            } else {
                buf.extend_from_slice(&(*offset as u32).to_be_bytes());
            }
        }
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        finish_index(buf)
    }

    /// Build a v1 index in memory.
    fn build_v1(entries: &[(ObjectId, u64, u32)]) -> Vec<u8> {
        let mut entries = entries.to_vec();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut buf = Vec::new();
        for count in fanout_for(&entries) {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for (oid, offset, _) in &entries {
            buf.extend_from_slice(&(*offset as u32).to_be_bytes());
            buf.extend_from_slice(oid.as_bytes());
        }
        finish_index(buf)
    }

    fn write_index(dir: &Path, data: &[u8]) -> PathBuf {
        let path = dir.join("test.idx");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn v2_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            (make_oid(0x00, 0x01), 100, 0x111),
            (make_oid(0x0a, 0x01), 300, 0x333),
            (make_oid(0xff, 0x01), 400, 0x444),
        ];
        let path = write_index(dir.path(), &build_v2(&entries));

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.version(), 2);
        assert_eq!(idx.num_objects(), 3);
        for (oid, offset, _) in &entries {
            assert_eq!(idx.lookup(oid), Some(*offset));
        }
        assert_eq!(idx.lookup(&make_oid(0x42, 0x42)), None);
    }

    #[test]
    fn v1_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            (make_oid(0x10, 0x01), 12, 0),
            (make_oid(0x20, 0x02), 99, 0),
        ];
        let path = write_index(dir.path(), &build_v1(&entries));

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.version(), 1);
        assert_eq!(idx.num_objects(), 2);
        assert_eq!(idx.lookup(&make_oid(0x10, 0x01)), Some(12));
        assert_eq!(idx.lookup(&make_oid(0x20, 0x02)), Some(99));
        assert_eq!(idx.crc32_at(0), None);
    }

    #[test]
    fn oids_come_back_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            (make_oid(0xff, 0x01), 100, 0),
            (make_oid(0x00, 0x01), 200, 0),
            (make_oid(0x55, 0x01), 300, 0),
        ];
        let path = write_index(dir.path(), &build_v2(&entries));

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.oid_at(0), make_oid(0x00, 0x01));
        assert_eq!(idx.oid_at(1), make_oid(0x55, 0x01));
        assert_eq!(idx.oid_at(2), make_oid(0xff, 0x01));
    }

    #[test]
    fn v2_crc32_table() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            (make_oid(0x10, 0x01), 100, 0xAAAA_BBBB),
            (make_oid(0x20, 0x01), 200, 0xCCCC_DDDD),
        ];
        let path = write_index(dir.path(), &build_v2(&entries));

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.crc32_at(0), Some(0xAAAA_BBBB));
        assert_eq!(idx.crc32_at(1), Some(0xCCCC_DDDD));
    }

    #[test]
    fn v2_large_offsets_use_overflow_table() {
        let dir = tempfile::tempdir().unwrap();
        let large = 5u64 * 1024 * 1024 * 1024;
        let entries = vec![
            (make_oid(0x01, 0x01), 12, 0),
            (make_oid(0x42, 0x01), large, 0),
        ];
        let path = write_index(dir.path(), &build_v2(&entries));

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.lookup(&make_oid(0x42, 0x01)), Some(large));
        assert_eq!(idx.lookup(&make_oid(0x01, 0x01)), Some(12));
    }

    #[test]
    fn empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_index(dir.path(), &build_v2(&[]));

        let idx = PackIndex::open(&path).unwrap();
        assert_eq!(idx.num_objects(), 0);
        assert_eq!(idx.lookup(&make_oid(0, 0)), None);
        assert_eq!(idx.iter().count(), 0);
    }

    #[test]
    fn iterator_yields_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            (make_oid(0x01, 0x01), 100, 0),
            (make_oid(0x02, 0x01), 200, 0),
        ];
        let path = write_index(dir.path(), &build_v2(&entries));

        let idx = PackIndex::open(&path).unwrap();
        let items: Vec<_> = idx.iter().collect();
        assert_eq!(items, vec![
            (make_oid(0x01, 0x01), 100),
            (make_oid(0x02, 0x01), 200),
        ]);
    }

    #[test]
    fn too_small_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_index(dir.path(), &[0u8; 64]);
        assert!(matches!(
            PackIndex::open(&path),
            Err(PackError::InvalidIndex(_))
        ));
    }
}
