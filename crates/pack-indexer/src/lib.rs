//! Streaming pack indexer: the receive side of fetch and push.
//!
//! [`PackIndexer`] consumes a pack stream once, validating every record
//! and spooling the bytes to a staging file. Deltas cannot be resolved
//! forward-only, so a second phase re-reads delta records from the staged
//! pack as their bases become available. A thin pack (one whose deltas
//! reference bases the sender knew the receiver already had) is
//! optionally completed by appending those bases from the local store and
//! repairing the header and trailer in place. The run ends by writing the
//! companion index and atomically publishing both artifacts.
//!
//! Three integrity streams run over the same bytes: a per-record CRC32
//! (stored in the index and re-verified on every re-read), the pack-wide
//! digest the trailer must match, and the per-object content address.

mod idx;
mod indexer;
mod input;
mod publish;
mod resolve;
mod thin;

pub use indexer::{IndexPackOptions, PackIndexer, PackedObjectInfo};
pub use publish::IndexOutcome;

pub use pack_utils::lockfile::PackLock;

use pack_hash::ObjectId;

/// Errors produced while indexing a pack.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("pack signature mismatch")]
    BadSignature,

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown object type {type_code} at offset {offset}")]
    UnknownType { offset: u64, type_code: u8 },

    #[error("bad offset-delta base at offset {0}")]
    BadBaseOffset(u64),

    #[error("packfile is truncated")]
    Truncated,

    #[error("pack checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("crc32 mismatch for record at offset {0}")]
    CrcMismatch(u64),

    #[error("corrupt deflate stream at offset {0}")]
    BadCompression(u64),

    #[error("inflated size mismatch at offset {offset}: expected {expected}, got {actual}")]
    SizeMismatch {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("collision on {oid}: pack content differs from existing object")]
    Collision { oid: ObjectId },

    #[error("object {oid} failed structural checks")]
    InvalidObject {
        oid: ObjectId,
        #[source]
        source: pack_object::ObjectError,
    },

    #[error("pack has {0} unresolved deltas")]
    UnresolvedDeltas(usize),

    #[error("missing delta base {0}")]
    MissingBase(ObjectId),

    #[error("pack was corrupted while writing to disk")]
    CorruptedOnDisk,

    #[error("offset {0} does not fit in a version 1 index")]
    OffsetTooLarge(u64),

    #[error("unsupported index version {0}")]
    UnsupportedIndexVersion(u32),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Format(#[from] pack_format::PackError),

    #[error(transparent)]
    Object(#[from] pack_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] pack_hash::HashError),

    #[error(transparent)]
    Odb(#[from] pack_odb::OdbError),

    #[error(transparent)]
    Util(#[from] pack_utils::UtilError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
