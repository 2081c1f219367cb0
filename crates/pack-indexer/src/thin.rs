//! Thin-pack completion: append missing bases and repair the pack.
//!
//! A thin pack deliberately omits bases the sender knew the receiver
//! already had. Each ref-delta chain still waiting after resolution is
//! satisfied out of the object store: the base is serialized as a fresh
//! whole-object record at the pack's growing tail, entered into the
//! table, and its children resolved. The header's object count and the
//! trailer digest are then rewritten in place, re-verifying on the way
//! that neither the original body nor the appended region was corrupted
//! between memory and disk.

use std::io::{Read, Seek, SeekFrom, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use pack_format::entry::encode_entry_header;
use pack_format::{PACK_HEADER_SIZE, PACK_TRAILER_SIZE};
use pack_hash::hasher::Hasher;
use pack_hash::ObjectId;
use pack_object::ObjectType;
use pack_odb::ObjectStore;
use pack_utils::progress::ProgressMonitor;

use crate::indexer::{PackIndexer, PackedObjectInfo};
use crate::IndexError;

impl<R: Read> PackIndexer<'_, R> {
    /// Complete a thin pack, returning how many base records were
    /// appended.
    pub(crate) fn fix_thin_pack(
        &mut self,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<usize, IndexError> {
        self.entries.reserve(self.base_by_id.len());
        let orig_eof = self.input.pack_len()? - PACK_TRAILER_SIZE as u64;
        let mut tail_digest = Hasher::new();
        let mut end = orig_eof;
        let mut appended = 0;
        let mut missing: Vec<ObjectId> = Vec::new();

        let bases: Vec<ObjectId> = self.base_by_id.keys().copied().collect();
        for base_id in bases {
            // Resolving one chain can drain others that share objects.
            if !self.base_by_id.contains_key(&base_id) {
                continue;
            }
            if progress.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let Some((kind, data)) = self.store.read(&base_id)? else {
                missing.push(base_id);
                continue;
            };

            let record = whole_record(kind, &data)?;
            let mut crc = crc32fast::Hasher::new();
            crc.update(&record);
            tail_digest.update(&record);
            self.input.write_at(end, &record)?;

            let offset = end;
            end += record.len() as u64;
            appended += 1;
            self.entries.push(PackedObjectInfo {
                oid: base_id,
                offset,
                crc32: crc.finalize(),
            });
            self.resolve_children(base_id, offset, kind, &data, progress)?;
        }

        for base_id in missing {
            if self.base_by_id.contains_key(&base_id) {
                return Err(IndexError::MissingBase(base_id));
            }
        }

        if appended > 0 {
            // A short appended record can leave stale trailer bytes past
            // the new end.
            self.input.set_pack_len(end)?;
            let tail_checksum = tail_digest.finalize()?;
            self.fix_header_footer(orig_eof, tail_checksum)?;
        }
        Ok(appended)
    }

    /// Rewrite the object count in the header and replace the trailer.
    ///
    /// One streaming pass re-digests the file three ways: the original
    /// region must still match the pass-1 trailer, the appended region
    /// must match the digest accumulated while writing it, and the whole
    /// file (with the patched header) becomes the new trailer.
    fn fix_header_footer(
        &mut self,
        orig_eof: u64,
        tail_checksum: ObjectId,
    ) -> Result<(), IndexError> {
        let total = self.entries.len() as u32;
        let orig_expected = self.pack_checksum;
        let file = self.input.file_mut();

        let mut hdr = [0u8; PACK_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut hdr)?;

        let mut orig_digest = Hasher::new();
        orig_digest.update(&hdr);

        hdr[8..12].copy_from_slice(&total.to_be_bytes());
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&hdr)?;

        let mut pack_digest = Hasher::new();
        pack_digest.update(&hdr);

        let mut tail_digest = Hasher::new();
        let mut orig_remaining = orig_eof - PACK_HEADER_SIZE as u64;
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            let split = orig_remaining.min(n as u64) as usize;
            orig_digest.update(&chunk[..split]);
            orig_remaining -= split as u64;
            tail_digest.update(&chunk[split..]);
            pack_digest.update(chunk);
        }

        if orig_digest.finalize()? != orig_expected || tail_digest.finalize()? != tail_checksum {
            return Err(IndexError::CorruptedOnDisk);
        }

        let new_checksum = pack_digest.finalize()?;
        file.write_all(new_checksum.as_bytes())?;
        self.pack_checksum = new_checksum;
        Ok(())
    }
}

/// Serialize a whole-object record: entry header plus deflated payload.
fn whole_record(kind: ObjectType, data: &[u8]) -> Result<Vec<u8>, IndexError> {
    let header = encode_entry_header(kind.code(), data.len() as u64);
    let mut encoder = ZlibEncoder::new(header, Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
