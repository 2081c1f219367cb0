use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::{Result, UtilError};

/// A temporary file with RAII cleanup and an OS-chosen unique name.
///
/// The file is created in the directory the final artifact will land in,
/// so that persisting is a single atomic rename. It is deleted when
/// dropped unless it has been persisted.
pub struct TempFile {
    inner: ::tempfile::NamedTempFile,
}

impl TempFile {
    /// Create a temporary file named `<prefix>XXXXXX<suffix>` in `dir`.
    pub fn in_dir(prefix: &str, suffix: &str, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let inner = ::tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        Ok(Self { inner })
    }

    /// Path of the temporary file.
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// The open read/write handle.
    pub fn file_mut(&mut self) -> &mut File {
        self.inner.as_file_mut()
    }

    /// Atomically rename into `target`, consuming the guard.
    ///
    /// On failure the temporary file is removed and the error returned.
    pub fn persist(self, target: impl AsRef<Path>) -> Result<()> {
        self.inner
            .persist(target.as_ref())
            .map(|_| ())
            .map_err(|e| UtilError::Io(e.error))
    }
}

impl Write for TempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.as_file_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.as_file_mut().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_persist() {
        let dir = ::tempfile::tempdir().unwrap();
        let target = dir.path().join("output.pack");

        let mut tf = TempFile::in_dir("incoming_", ".pack", dir.path()).unwrap();
        tf.write_all(b"hello world").unwrap();
        tf.persist(&target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hello world");
    }

    #[test]
    fn drop_cleans_up() {
        let dir = ::tempfile::tempdir().unwrap();
        let temp_path;
        {
            let mut tf = TempFile::in_dir("incoming_", ".idx", dir.path()).unwrap();
            temp_path = tf.path().to_path_buf();
            tf.write_all(b"temporary").unwrap();
            assert!(temp_path.exists());
        }
        assert!(!temp_path.exists());
    }

    #[test]
    fn names_carry_prefix_and_suffix() {
        let dir = ::tempfile::tempdir().unwrap();
        let tf = TempFile::in_dir("incoming_", ".pack", dir.path()).unwrap();
        let name = tf.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("incoming_"));
        assert!(name.ends_with(".pack"));
    }

    #[test]
    fn two_temps_never_collide() {
        let dir = ::tempfile::tempdir().unwrap();
        let a = TempFile::in_dir("incoming_", ".pack", dir.path()).unwrap();
        let b = TempFile::in_dir("incoming_", ".pack", dir.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
