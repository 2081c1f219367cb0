//! Pack index emission (versions 1 and 2).
//!
//! Version 1 is the historical format: fan-out table, then `(offset,
//! oid)` pairs; offsets must fit in 31 bits and records carry no CRC.
//! Version 2 stores separate oid, CRC32, and offset tables with a 64-bit
//! overflow table. Both embed the pack trailer digest so an index can be
//! paired with its pack, and end with a self-digest.

use std::io::{Read, Write};

use pack_format::IDX_SIGNATURE_V2;
use pack_hash::hasher::Hasher;
use pack_hash::ObjectId;

use crate::indexer::{PackIndexer, PackedObjectInfo};
use crate::IndexError;

/// Largest offset a version 1 index can describe.
const MAX_V1_OFFSET: u64 = 0x7fff_ffff;

/// Pick the oldest index version able to describe every entry.
pub(crate) fn oldest_fitting_version(entries: &[PackedObjectInfo]) -> u32 {
    if entries.iter().any(|e| e.offset > MAX_V1_OFFSET) {
        2
    } else {
        1
    }
}

/// Serialize a sorted entry table into index file bytes.
pub(crate) fn build_index(
    version: u32,
    entries: &[PackedObjectInfo],
    pack_checksum: &ObjectId,
) -> Result<Vec<u8>, IndexError> {
    let mut buf = Vec::new();

    match version {
        1 => {
            write_fanout(&mut buf, entries);
            for e in entries {
                if e.offset > MAX_V1_OFFSET {
                    return Err(IndexError::OffsetTooLarge(e.offset));
                }
                buf.extend_from_slice(&(e.offset as u32).to_be_bytes());
                buf.extend_from_slice(e.oid.as_bytes());
            }
        }
        2 => {
            buf.extend_from_slice(&IDX_SIGNATURE_V2);
            buf.extend_from_slice(&2u32.to_be_bytes());
            write_fanout(&mut buf, entries);
            for e in entries {
                buf.extend_from_slice(e.oid.as_bytes());
            }
            for e in entries {
                buf.extend_from_slice(&e.crc32.to_be_bytes());
            }
            let mut large: Vec<u64> = Vec::new();
            for e in entries {
                if e.offset >= 0x8000_0000 {
                    buf.extend_from_slice(&(0x8000_0000u32 | large.len() as u32).to_be_bytes());
                    large.push(e.offset);
                } else {
                    buf.extend_from_slice(&(e.offset as u32).to_be_bytes());
                }
            }
            for offset in large {
                buf.extend_from_slice(&offset.to_be_bytes());
            }
        }
        v => return Err(IndexError::UnsupportedIndexVersion(v)),
    }

    buf.extend_from_slice(pack_checksum.as_bytes());

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    buf.extend_from_slice(hasher.finalize()?.as_bytes());
    Ok(buf)
}

fn write_fanout(buf: &mut Vec<u8>, entries: &[PackedObjectInfo]) {
    let mut fanout = [0u32; 256];
    for e in entries {
        fanout[e.oid.first_byte() as usize] += 1;
    }
    for i in 1..256 {
        fanout[i] += fanout[i - 1];
    }
    for count in fanout {
        buf.extend_from_slice(&count.to_be_bytes());
    }
}

impl<R: Read> PackIndexer<'_, R> {
    /// Sort the entry table and write the staged index file.
    pub(crate) fn write_index(&mut self) -> Result<(), IndexError> {
        self.entries.sort_by(|a, b| a.oid.cmp(&b.oid));
        let version = self
            .opts
            .index_version
            .unwrap_or_else(|| oldest_fitting_version(&self.entries));
        let data = build_index(version, &self.entries, &self.pack_checksum)?;
        self.tmp_idx.file_mut().write_all(&data)?;
        self.tmp_idx.file_mut().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(first_byte: u8, offset: u64) -> PackedObjectInfo {
        let mut raw = [0u8; 20];
        raw[0] = first_byte;
        raw[19] = 1;
        PackedObjectInfo {
            oid: ObjectId::from_raw(raw),
            offset,
            crc32: 0,
        }
    }

    #[test]
    fn narrowest_version_is_one_for_small_packs() {
        let entries = [entry(0x10, 12), entry(0x20, MAX_V1_OFFSET)];
        assert_eq!(oldest_fitting_version(&entries), 1);
    }

    #[test]
    fn large_offsets_force_version_two() {
        let entries = [entry(0x10, 12), entry(0x20, MAX_V1_OFFSET + 1)];
        assert_eq!(oldest_fitting_version(&entries), 2);
    }

    #[test]
    fn v1_rejects_wide_offsets() {
        let entries = [entry(0x10, MAX_V1_OFFSET + 1)];
        assert!(matches!(
            build_index(1, &entries, &ObjectId::NULL),
            Err(IndexError::OffsetTooLarge(_))
        ));
    }

    #[test]
    fn unsupported_version_rejected() {
        assert!(matches!(
            build_index(3, &[], &ObjectId::NULL),
            Err(IndexError::UnsupportedIndexVersion(3))
        ));
    }

    #[test]
    fn v2_overflow_table_round_trips_through_reader() {
        let dir = tempfile::tempdir().unwrap();
        let big = 7u64 * 1024 * 1024 * 1024;
        let mut entries = vec![entry(0x01, 12), entry(0xf0, big)];
        entries.sort_by(|a, b| a.oid.cmp(&b.oid));

        let data = build_index(2, &entries, &ObjectId::NULL).unwrap();
        let path = dir.path().join("big.idx");
        std::fs::write(&path, &data).unwrap();

        let idx = pack_format::index::PackIndex::open(&path).unwrap();
        assert_eq!(idx.lookup(&entries[1].oid), Some(big));
        assert_eq!(idx.lookup(&entries[0].oid), Some(12));
    }
}
