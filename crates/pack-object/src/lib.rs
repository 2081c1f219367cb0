//! Object typing and structural validation.
//!
//! Objects reconstructed from a pack are opaque payloads tagged with one of
//! the four object types. [`ObjectChecker`] validates that a payload is
//! structurally well-formed for its claimed type before it is admitted.

pub mod check;

pub use check::ObjectChecker;

use bstr::BString;
use pack_hash::HashError;

/// Errors produced by object typing and validation.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type: {0}")]
    InvalidType(BString),

    #[error("unknown pack type code {0}")]
    InvalidTypeCode(u8),

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: String },

    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The four types of stored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    /// Parse from the type name used in object headers.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"commit" => Ok(Self::Commit),
            b"tree" => Ok(Self::Tree),
            b"blob" => Ok(Self::Blob),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidType(BString::from(s))),
        }
    }

    /// The canonical byte representation.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Commit => b"commit",
            Self::Tree => b"tree",
            Self::Blob => b"blob",
            Self::Tag => b"tag",
        }
    }

    /// The canonical name, as used in the object header digest.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Type number as used in pack entry headers (1–4).
    pub fn code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Map a pack entry type code back to an object type.
    ///
    /// Codes 0 and 5 are reserved; 6 and 7 are delta records, not object
    /// types.
    pub fn from_code(code: u8) -> Result<Self, ObjectError> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            other => Err(ObjectError::InvalidTypeCode(other)),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = ObjectError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_roundtrip() {
        for kind in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::from_bytes(kind.as_bytes()).unwrap(), kind);
            assert_eq!(kind.as_str().parse::<ObjectType>().unwrap(), kind);
        }
        assert!(ObjectType::from_bytes(b"unknown").is_err());
    }

    #[test]
    fn type_code_roundtrip() {
        for kind in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::from_code(kind.code()).unwrap(), kind);
        }
    }

    #[test]
    fn reserved_codes_fail() {
        for code in [0u8, 5, 6, 7, 8] {
            assert!(matches!(
                ObjectType::from_code(code),
                Err(ObjectError::InvalidTypeCode(c)) if c == code
            ));
        }
    }
}
