//! Pack wire format: entry headers, binary deltas, and readers for
//! finished `.pack`/`.idx` pairs.
//!
//! A pack file is a 12-byte header (`PACK`, version, object count), a
//! sequence of object records (each a variable-length header followed by
//! a deflated payload or a delta descriptor), and a trailing 20-byte
//! digest of everything before it.

pub mod delta;
pub mod entry;
pub mod index;
pub mod pack;

use pack_hash::ObjectId;

/// Errors that can occur reading pack format data.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid pack header: {0}")]
    InvalidHeader(String),

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid pack index: {0}")]
    InvalidIndex(String),

    #[error("corrupt pack entry at offset {0}")]
    CorruptEntry(u64),

    #[error("invalid delta at offset {offset}: {reason}")]
    InvalidDelta { offset: u64, reason: String },

    #[error("delta base not found: {0}")]
    MissingBase(ObjectId),

    #[error("delta chain too deep (>{max_depth} levels) at offset {offset}")]
    DeltaChainTooDeep { offset: u64, max_depth: usize },

    #[error("pack checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] pack_hash::HashError),

    #[error(transparent)]
    Object(#[from] pack_object::ObjectError),
}

/// Pack format constants.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_SIZE: usize = 12;
pub const PACK_TRAILER_SIZE: usize = 20;

/// Pack index v2 signature (`\377tOc`); v1 files have no signature.
pub const IDX_SIGNATURE_V2: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];

/// Maximum delta chain depth the reader will follow before bailing out.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 512;
