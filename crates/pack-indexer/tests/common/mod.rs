//! Hand-rolled pack construction shared by the integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use pack_format::delta::write_varint;
use pack_format::entry::{encode_entry_header, encode_ofs_delta_offset};
use pack_hash::hasher::Hasher;
use pack_hash::ObjectId;
use pack_object::ObjectType;

pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn blob_oid(data: &[u8]) -> ObjectId {
    Hasher::hash_object("blob", data).unwrap()
}

/// Prefix delta instructions with the source/target size varints.
pub fn delta_stream(source_len: usize, target_len: usize, instructions: &[u8]) -> Vec<u8> {
    let mut delta = Vec::new();
    delta.extend_from_slice(&write_varint(source_len as u64));
    delta.extend_from_slice(&write_varint(target_len as u64));
    delta.extend_from_slice(instructions);
    delta
}

/// Builds a pack byte stream record by record.
pub struct PackBuilder {
    buf: Vec<u8>,
}

impl PackBuilder {
    pub fn new(declared_count: u32) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PACK");
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&declared_count.to_be_bytes());
        Self { buf }
    }

    /// Append a whole-object record, returning its offset.
    pub fn whole(&mut self, kind: ObjectType, data: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf
            .extend_from_slice(&encode_entry_header(kind.code(), data.len() as u64));
        self.buf.extend_from_slice(&compress(data));
        offset
    }

    /// Append an offset-delta record against the record at `base_offset`.
    pub fn ofs_delta(&mut self, base_offset: u64, delta: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf
            .extend_from_slice(&encode_entry_header(6, delta.len() as u64));
        self.buf
            .extend_from_slice(&encode_ofs_delta_offset(offset - base_offset));
        self.buf.extend_from_slice(&compress(delta));
        offset
    }

    /// Append a ref-delta record against `base_oid`.
    pub fn ref_delta(&mut self, base_oid: ObjectId, delta: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf
            .extend_from_slice(&encode_entry_header(7, delta.len() as u64));
        self.buf.extend_from_slice(base_oid.as_bytes());
        self.buf.extend_from_slice(&compress(delta));
        offset
    }

    /// Append an arbitrary record header + deflated payload, for malformed
    /// type codes.
    pub fn raw_record(&mut self, type_code: u8, data: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf
            .extend_from_slice(&encode_entry_header(type_code, data.len() as u64));
        self.buf.extend_from_slice(&compress(data));
        offset
    }

    /// Terminate with the correct trailer digest.
    pub fn finish(self) -> Vec<u8> {
        let mut buf = self.buf;
        let mut hasher = Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(hasher.finalize().unwrap().as_bytes());
        buf
    }

    /// Terminate with a caller-chosen (typically wrong) trailer.
    pub fn finish_with_trailer(self, trailer: [u8; 20]) -> Vec<u8> {
        let mut buf = self.buf;
        buf.extend_from_slice(&trailer);
        buf
    }

    /// The bytes so far, without any trailer. Simulates truncation.
    pub fn truncated(self) -> Vec<u8> {
        self.buf
    }
}

/// Count staging files left behind in `dir`.
pub fn staging_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("incoming_"))
        .count()
}

/// Read the big-endian object count out of a pack file's header.
pub fn pack_header_count(path: &Path) -> u32 {
    let raw = std::fs::read(path).unwrap();
    u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]])
}
