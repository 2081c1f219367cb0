use std::fmt;
use std::str::FromStr;

use crate::hex::{hex_decode, hex_to_string};
use crate::{HashError, OID_RAW_LEN};

/// An object identifier: the 20-byte digest of an object's canonical form.
///
/// Identifiers compare by lexicographic byte order, which is the order the
/// pack index stores them in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OID_RAW_LEN]);

impl ObjectId {
    /// The null OID (all zeros).
    pub const NULL: Self = Self([0u8; OID_RAW_LEN]);

    /// Create an ObjectId from a raw digest.
    pub fn from_raw(bytes: [u8; OID_RAW_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an ObjectId from a byte slice of exactly [`OID_RAW_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != OID_RAW_LEN {
            return Err(HashError::InvalidHashLength {
                expected: OID_RAW_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; OID_RAW_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Create an ObjectId from a 40-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut bytes = [0u8; OID_RAW_LEN];
        hex_decode(hex, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if this is the null (all-zeros) OID.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Get the hex string representation (lowercase).
    pub fn to_hex(&self) -> String {
        hex_to_string(&self.0)
    }

    /// Get the first byte of the digest (for fan-out table indexing).
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
