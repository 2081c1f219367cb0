//! Object identity for the packidx workspace.
//!
//! Every object is named by the 20-byte digest of its canonical form
//! `"<type> <length>\0<payload>"`. This crate provides the [`ObjectId`]
//! content address, the streaming [`hasher::Hasher`] that computes it
//! (SHA-1 with collision detection), and hex encoding/decoding.

mod error;
pub mod hasher;
pub mod hex;
mod oid;

pub use error::HashError;
pub use oid::ObjectId;

/// Length in bytes of an object identifier.
pub const OID_RAW_LEN: usize = 20;

/// Length in characters of a hex-encoded object identifier.
pub const OID_HEX_LEN: usize = OID_RAW_LEN * 2;
