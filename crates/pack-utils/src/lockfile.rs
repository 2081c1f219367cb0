use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{Result, UtilError};

/// Exclusive hold on a published pack.
///
/// A `<pack>.keep` file next to a pack marks it as off limits for pruning
/// and repacking until the hold is released. The file is created with
/// O_CREAT|O_EXCL so two receivers cannot hold the same pack, and its
/// content is the caller's message explaining who holds it.
///
/// Unlike a scratch lock, the hold deliberately outlives this value: the
/// caller that requested it releases it with [`unlock`](PackLock::unlock)
/// once the objects are referenced.
#[derive(Debug)]
pub struct PackLock {
    keep_path: PathBuf,
}

impl PackLock {
    /// Install `<pack>.keep` containing `message`.
    ///
    /// Fails with [`UtilError::AlreadyHeld`] if another hold exists.
    pub fn acquire(pack_path: &Path, message: &str) -> Result<Self> {
        let keep_path = pack_path.with_extension("keep");
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&keep_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    UtilError::AlreadyHeld {
                        path: keep_path.clone(),
                    }
                } else {
                    UtilError::CreateKeep {
                        path: keep_path.clone(),
                        source: e,
                    }
                }
            })?;

        file.write_all(message.as_bytes())?;
        if !message.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.sync_all()?;

        Ok(Self { keep_path })
    }

    /// Path of the `.keep` file.
    pub fn keep_path(&self) -> &Path {
        &self.keep_path
    }

    /// Release the hold by removing the `.keep` file.
    pub fn unlock(self) -> Result<()> {
        fs::remove_file(&self.keep_path)?;
        Ok(())
    }
}
