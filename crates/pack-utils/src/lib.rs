//! Shared plumbing for the packidx workspace: progress reporting,
//! exclusive pack holds, and collision-safe temporary files.

pub mod error;
pub mod lockfile;
pub mod progress;
pub mod tempfile;

pub use error::UtilError;

pub type Result<T> = std::result::Result<T, UtilError>;
