//! Pass 2: resolve deltas against bases reconstructed from the staged
//! pack.
//!
//! The streaming pass left every delta parked under its base (by offset
//! or by id). Walking the object table, each entry that has children is
//! re-read from disk, its CRC32 checked against the value recorded while
//! streaming, and its children applied, content-addressed, entered, and
//! recursed into. Siblings resolve in ascending header-offset order
//! so file reads stay monotone.

use std::io::Read;

use pack_format::delta::apply_delta;
use pack_format::PackError;
use pack_hash::ObjectId;
use pack_object::ObjectType;
use pack_utils::progress::ProgressMonitor;

use crate::indexer::{PackIndexer, PackedObjectInfo};
use crate::input::Source;
use crate::IndexError;

impl<R: Read> PackIndexer<'_, R> {
    pub(crate) fn resolve_deltas(
        &mut self,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<(), IndexError> {
        // Entries appended during resolution have no waiting children of
        // their own by construction, so the frontier is fixed here.
        let last = self.entries.len();
        for i in 0..last {
            if progress.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let entry = self.entries[i];
            let has_children = self.base_by_pos.contains_key(&entry.offset)
                || self.base_by_id.contains_key(&entry.oid);
            if has_children {
                self.resolve_base(entry, progress)?;
            }
        }
        Ok(())
    }

    /// Re-read a known base entry and resolve everything waiting on it.
    fn resolve_base(
        &mut self,
        entry: PackedObjectInfo,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<(), IndexError> {
        let (kind, data) = self.read_record(entry.offset, entry.crc32, None)?;
        self.resolve_children(entry.oid, entry.offset, kind, &data, progress)
    }

    /// Resolve one delta record against its reconstructed parent, then
    /// recurse into any deltas waiting on the result.
    fn resolve_child(
        &mut self,
        offset: u64,
        expected_crc: u32,
        parent_kind: ObjectType,
        parent: &[u8],
        progress: &mut dyn ProgressMonitor,
    ) -> Result<(), IndexError> {
        if progress.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let (kind, data) =
            self.read_record(offset, expected_crc, Some((parent_kind, parent)))?;
        let oid = self.add_object(kind, offset, expected_crc, &data)?;
        progress.update(1);
        self.resolve_children(oid, offset, kind, &data, progress)
    }

    /// Detach both child buckets of a resolved object and resolve them,
    /// merged by ascending header offset.
    pub(crate) fn resolve_children(
        &mut self,
        oid: ObjectId,
        offset: u64,
        kind: ObjectType,
        data: &[u8],
        progress: &mut dyn ProgressMonitor,
    ) -> Result<(), IndexError> {
        let by_id_head = self.base_by_id.remove(&oid);
        let by_id = self.take_children(by_id_head);
        let by_pos_head = self.base_by_pos.remove(&offset);
        let by_pos = self.take_children(by_pos_head);

        let (mut i, mut j) = (0, 0);
        while i < by_id.len() || j < by_pos.len() {
            let take_id =
                j >= by_pos.len() || (i < by_id.len() && by_id[i].0 < by_pos[j].0);
            let (child_offset, child_crc) = if take_id {
                i += 1;
                by_id[i - 1]
            } else {
                j += 1;
                by_pos[j - 1]
            };
            self.resolve_child(child_offset, child_crc, kind, data, progress)?;
        }
        Ok(())
    }

    /// Walk an intrusive delta list into `(offset, crc32)` pairs, reversed
    /// back into pack order (the streaming pass prepended).
    fn take_children(&self, head: Option<usize>) -> Vec<(u64, u32)> {
        let mut out = Vec::new();
        let mut cursor = head;
        while let Some(i) = cursor {
            let delta = &self.deltas[i];
            out.push((delta.offset, delta.crc32));
            cursor = delta.next;
        }
        out.reverse();
        out
    }

    /// Read one record back from the staged pack, verifying its CRC32
    /// against the value recorded while streaming. A mismatch means the
    /// bytes were corrupted after they were written.
    fn read_record(
        &mut self,
        offset: u64,
        expected_crc: u32,
        parent: Option<(ObjectType, &[u8])>,
    ) -> Result<(ObjectType, Vec<u8>), IndexError> {
        self.input.seek(offset)?;
        self.input.crc_reset();
        let (type_code, size) = self.read_entry_header(Source::File)?;

        let resolved = match type_code {
            1..=4 => {
                let data = self.input.inflate(Source::File, offset, size)?;
                (ObjectType::from_code(type_code)?, data)
            }
            6 => {
                self.read_ofs_delta_base(Source::File, offset)?;
                let instructions = self.input.inflate(Source::File, offset, size)?;
                let (parent_kind, parent_data) = parent.ok_or_else(|| orphan_delta(offset))?;
                (parent_kind, apply_delta(parent_data, &instructions)?)
            }
            7 => {
                let mut raw = [0u8; pack_hash::OID_RAW_LEN];
                self.input.read_exact_crc(Source::File, &mut raw)?;
                let instructions = self.input.inflate(Source::File, offset, size)?;
                let (parent_kind, parent_data) = parent.ok_or_else(|| orphan_delta(offset))?;
                (parent_kind, apply_delta(parent_data, &instructions)?)
            }
            _ => return Err(IndexError::UnknownType { offset, type_code }),
        };

        let crc32 = self.input.crc_finish();
        if crc32 != expected_crc {
            return Err(IndexError::CrcMismatch(offset));
        }
        Ok(resolved)
    }
}

fn orphan_delta(offset: u64) -> IndexError {
    IndexError::Format(PackError::InvalidDelta {
        offset,
        reason: "delta record visited without its base".into(),
    })
}
