//! Pass 1: stream the pack once, validating and spooling it to disk.
//!
//! Whole objects are inflated, content-addressed, checked, and entered
//! into the object table immediately. Delta records cannot be resolved
//! forward-only, so each one is skip-inflated (to advance the stream and
//! its CRC32) and parked in one of two base-keyed collections: offset
//! deltas under the absolute position of their base, ref deltas under its
//! 20-byte id. The trailer must match the running pack-wide digest.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use pack_format::{PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_TRAILER_SIZE};
use pack_hash::hasher::Hasher;
use pack_hash::{ObjectId, OID_RAW_LEN};
use pack_object::{ObjectChecker, ObjectType};
use pack_odb::ObjectStore;
use pack_utils::progress::ProgressMonitor;
use pack_utils::tempfile::TempFile;

use crate::input::{PackInput, Source};
use crate::publish::IndexOutcome;
use crate::IndexError;

/// Options controlling a pack-indexing run.
#[derive(Default)]
pub struct IndexPackOptions {
    /// Complete a thin pack by copying missing bases out of the store.
    pub fix_thin: bool,

    /// Publish even when the pack contains zero objects; otherwise an
    /// empty pack discards its artifacts and reports nothing installed.
    pub keep_empty: bool,

    /// Index version to write. `None` picks the oldest version that fits.
    pub index_version: Option<u32>,

    /// Structural checker applied to every whole or reconstructed object;
    /// `None` disables checking.
    pub check: Option<ObjectChecker>,

    /// When set, install an exclusive `.keep` hold on the final pack
    /// before publication and return it to the caller.
    pub lock_message: Option<String>,
}

/// One fully resolved object: identity, record offset, and the CRC32 of
/// every byte making up its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedObjectInfo {
    pub oid: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// Deferred delta noted during the streaming pass. Nodes live in one
/// arena and chain through `next`, newest first; resolution reverses the
/// list back to pack order.
pub(crate) struct UnresolvedDelta {
    pub(crate) offset: u64,
    pub(crate) crc32: u32,
    pub(crate) next: Option<usize>,
}

/// Streaming pack indexer. One instance indexes one stream.
pub struct PackIndexer<'a, R> {
    pub(crate) input: PackInput<R>,
    pub(crate) store: &'a dyn ObjectStore,
    pub(crate) opts: IndexPackOptions,
    pub(crate) dest_dir: PathBuf,
    pub(crate) tmp_idx: TempFile,

    /// Object count declared by the pack header.
    pub(crate) object_count: u32,
    pub(crate) entries: Vec<PackedObjectInfo>,
    /// Arena of deferred deltas; both base maps index into it.
    pub(crate) deltas: Vec<UnresolvedDelta>,
    /// Offset-delta chains keyed by the base record's absolute position.
    pub(crate) base_by_pos: HashMap<u64, usize>,
    /// Ref-delta chains keyed by the base's content address.
    pub(crate) base_by_id: HashMap<ObjectId, usize>,
    pub(crate) delta_count: usize,
    /// Trailer digest; replaced if thin-pack completion rewrites it.
    pub(crate) pack_checksum: ObjectId,
}

impl<'a, R: Read> PackIndexer<'a, R> {
    /// Create an indexer that stages and publishes its artifacts in `dir`.
    ///
    /// The staging files carry OS-chosen unique names and delete
    /// themselves unless the run completes.
    pub fn new(
        stream: R,
        dir: impl AsRef<Path>,
        store: &'a dyn ObjectStore,
        opts: IndexPackOptions,
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref();
        let tmp_pack = TempFile::in_dir("incoming_", ".pack", dir)?;
        let tmp_idx = TempFile::in_dir("incoming_", ".idx", dir)?;
        Ok(Self {
            input: PackInput::new(stream, tmp_pack),
            store,
            opts,
            dest_dir: dir.to_path_buf(),
            tmp_idx,
            object_count: 0,
            entries: Vec::new(),
            deltas: Vec::new(),
            base_by_pos: HashMap::new(),
            base_by_id: HashMap::new(),
            delta_count: 0,
            pack_checksum: ObjectId::NULL,
        })
    }

    /// Consume the stream, produce the pack and index, and publish them.
    ///
    /// Returns `None` when there was nothing to install: a zero-object
    /// pack without `keep_empty`, or a pack identical to one already
    /// published. Any failure removes the staged artifacts before it
    /// surfaces.
    pub fn index_pack(
        mut self,
        progress: &mut dyn ProgressMonitor,
    ) -> Result<Option<IndexOutcome>, IndexError> {
        self.run(progress)?;
        if self.object_count == 0 && !self.opts.keep_empty {
            return Ok(None);
        }
        self.publish()
    }

    fn run(&mut self, progress: &mut dyn ProgressMonitor) -> Result<(), IndexError> {
        progress.start(2);

        self.read_pack_header()?;
        progress.begin_task("Receiving objects", Some(u64::from(self.object_count)));
        for _ in 0..self.object_count {
            if progress.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            self.index_one_object()?;
            progress.update(1);
        }
        self.read_pack_trailer()?;
        progress.end_task();

        if self.delta_count > 0 {
            progress.begin_task("Resolving deltas", Some(self.delta_count as u64));
            self.resolve_deltas(progress)?;
            let mut appended = 0;
            if self.entries.len() < self.object_count as usize {
                if !self.opts.fix_thin {
                    return Err(IndexError::UnresolvedDeltas(
                        self.object_count as usize - self.entries.len(),
                    ));
                }
                appended = self.fix_thin_pack(progress)?;
            }
            let expected = self.object_count as usize + appended;
            if self.entries.len() != expected {
                return Err(IndexError::UnresolvedDeltas(expected - self.entries.len()));
            }
            progress.end_task();
        }

        self.input.sync_pack()?;
        self.write_index()?;
        Ok(())
    }

    fn read_pack_header(&mut self) -> Result<(), IndexError> {
        let hdr = self.input.peek(Source::Input, PACK_HEADER_SIZE)?;
        if &hdr[0..4] != PACK_SIGNATURE {
            return Err(IndexError::BadSignature);
        }
        let version = u32::from_be_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
        if version != 2 && version != 3 {
            return Err(IndexError::UnsupportedVersion(version));
        }
        self.object_count = u32::from_be_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]);
        self.input.use_bytes(PACK_HEADER_SIZE);
        Ok(())
    }

    fn index_one_object(&mut self) -> Result<(), IndexError> {
        let offset = self.input.position();
        self.input.crc_reset();
        let (type_code, size) = self.read_entry_header(Source::Input)?;

        match type_code {
            1..=4 => {
                let kind = ObjectType::from_code(type_code)?;
                let data = self.input.inflate(Source::Input, offset, size)?;
                let crc32 = self.input.crc_finish();
                self.add_object(kind, offset, crc32, &data)?;
            }
            6 => {
                let base_pos = self.read_ofs_delta_base(Source::Input, offset)?;
                self.input.skip_inflate(Source::Input, offset, size)?;
                let crc32 = self.input.crc_finish();
                let next = self.base_by_pos.get(&base_pos).copied();
                self.deltas.push(UnresolvedDelta {
                    offset,
                    crc32,
                    next,
                });
                self.base_by_pos.insert(base_pos, self.deltas.len() - 1);
                self.delta_count += 1;
            }
            7 => {
                let mut raw = [0u8; OID_RAW_LEN];
                self.input.read_exact_crc(Source::Input, &mut raw)?;
                let base_id = ObjectId::from_raw(raw);
                self.input.skip_inflate(Source::Input, offset, size)?;
                let crc32 = self.input.crc_finish();
                let next = self.base_by_id.get(&base_id).copied();
                self.deltas.push(UnresolvedDelta {
                    offset,
                    crc32,
                    next,
                });
                self.base_by_id.insert(base_id, self.deltas.len() - 1);
                self.delta_count += 1;
            }
            _ => return Err(IndexError::UnknownType { offset, type_code }),
        }
        Ok(())
    }

    /// Decode the record header: 3-bit type code plus the inflated size in
    /// little-endian 7-bit groups.
    pub(crate) fn read_entry_header(&mut self, src: Source) -> Result<(u8, u64), IndexError> {
        let mut byte = self.input.read_byte(src)?;
        let type_code = (byte >> 4) & 0x07;
        let mut size = u64::from(byte & 0x0f);
        let mut shift = 4;
        while byte & 0x80 != 0 {
            byte = self.input.read_byte(src)?;
            size |= u64::from(byte & 0x7f) << shift;
            shift += 7;
        }
        Ok((type_code, size))
    }

    /// Decode an offset-delta back-offset (big-endian add-one base-128)
    /// and return the base record's absolute position.
    pub(crate) fn read_ofs_delta_base(
        &mut self,
        src: Source,
        offset: u64,
    ) -> Result<u64, IndexError> {
        let mut byte = self.input.read_byte(src)?;
        let mut ofs = u64::from(byte & 0x7f);
        while byte & 0x80 != 0 {
            byte = self.input.read_byte(src)?;
            ofs += 1;
            ofs = (ofs << 7) + u64::from(byte & 0x7f);
        }
        offset
            .checked_sub(ofs)
            .filter(|base| *base >= PACK_HEADER_SIZE as u64)
            .ok_or(IndexError::BadBaseOffset(offset))
    }

    /// Content-address, check, collision-test, and enter a resolved
    /// object into the table.
    pub(crate) fn add_object(
        &mut self,
        kind: ObjectType,
        offset: u64,
        crc32: u32,
        data: &[u8],
    ) -> Result<ObjectId, IndexError> {
        let oid = Hasher::hash_object(kind.as_str(), data)?;
        if let Some(checker) = &self.opts.check {
            checker
                .check(kind, data)
                .map_err(|source| IndexError::InvalidObject { oid, source })?;
        }
        if let Some((existing_kind, existing)) = self.store.read(&oid)? {
            if existing_kind != kind || existing != data {
                return Err(IndexError::Collision { oid });
            }
        }
        self.entries.push(PackedObjectInfo { oid, offset, crc32 });
        Ok(oid)
    }

    fn read_pack_trailer(&mut self) -> Result<(), IndexError> {
        // Everything before the trailer belongs to the digest.
        self.input.sync()?;
        let actual = self.input.take_digest().finalize()?;

        let mut raw = [0u8; PACK_TRAILER_SIZE];
        raw.copy_from_slice(self.input.peek(Source::Input, PACK_TRAILER_SIZE)?);
        let expected = ObjectId::from_raw(raw);
        if actual != expected {
            return Err(IndexError::ChecksumMismatch { expected, actual });
        }

        // The trailer itself still belongs in the file.
        self.input.use_bytes(PACK_TRAILER_SIZE);
        self.input.sync()?;
        self.pack_checksum = expected;
        Ok(())
    }
}
