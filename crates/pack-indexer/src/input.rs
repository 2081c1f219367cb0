//! Dual-source buffered reading over the incoming stream and the
//! partially written pack.
//!
//! One buffer serves two fill modes. Input-fill draws from the
//! forward-only stream; on each refill the consumed prefix is first
//! *synced* (folded into the pack-wide digest and appended to the
//! staging file), so that by the time delta resolution needs to re-read
//! a region, it is already on disk. File-fill draws from the staging
//! file at its current position and touches neither the digest nor the
//! file tail. Every consumed byte also feeds the per-record CRC32,
//! except where a call site advances with [`PackInput::use_bytes`] and
//! accounts for the CRC itself.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use flate2::{Decompress, FlushDecompress, Status};
use pack_hash::hasher::Hasher;
use pack_utils::tempfile::TempFile;

use crate::IndexError;

/// Which side of the dual-source reader a read draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// The forward-only incoming stream.
    Input,
    /// The partially written pack on disk.
    File,
}

pub(crate) const BUFFER_SIZE: usize = 8 * 1024;

pub(crate) struct PackInput<R> {
    stream: R,
    pack: TempFile,
    buf: Box<[u8; BUFFER_SIZE]>,
    /// Logical pack offset of `buf[0]`.
    base: u64,
    /// Read cursor within the buffer.
    pos: usize,
    /// Valid bytes at `buf[pos..pos + avail]`.
    avail: usize,
    crc: crc32fast::Hasher,
    /// Pack-wide digest over synced bytes; taken once at trailer time.
    digest: Option<Hasher>,
    inflater: Decompress,
}

impl<R: Read> PackInput<R> {
    pub(crate) fn new(stream: R, pack: TempFile) -> Self {
        Self {
            stream,
            pack,
            buf: Box::new([0u8; BUFFER_SIZE]),
            base: 0,
            pos: 0,
            avail: 0,
            crc: crc32fast::Hasher::new(),
            digest: Some(Hasher::new()),
            inflater: Decompress::new(true),
        }
    }

    /// Logical position of the next unread byte.
    pub(crate) fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(crate) fn crc_reset(&mut self) {
        self.crc = crc32fast::Hasher::new();
    }

    pub(crate) fn crc_finish(&mut self) -> u32 {
        std::mem::replace(&mut self.crc, crc32fast::Hasher::new()).finalize()
    }

    /// Ensure at least `need` contiguous bytes are buffered, returning the
    /// buffer index where they start.
    ///
    /// In input mode a zero-byte read while more bytes are needed is a
    /// truncated pack; in file mode it means a read past the flushed
    /// region, which equally cannot be satisfied.
    pub(crate) fn fill(&mut self, src: Source, need: usize) -> Result<usize, IndexError> {
        while self.avail < need {
            let next = self.pos + self.avail;
            if next + need > BUFFER_SIZE {
                match src {
                    Source::Input => self.sync()?,
                    Source::File => {
                        self.buf.copy_within(self.pos..self.pos + self.avail, 0);
                        self.base += self.pos as u64;
                        self.pos = 0;
                    }
                }
            }
            let next = self.pos + self.avail;
            let n = match src {
                Source::Input => self.stream.read(&mut self.buf[next..])?,
                Source::File => self.pack.file_mut().read(&mut self.buf[next..])?,
            };
            if n == 0 {
                return Err(IndexError::Truncated);
            }
            self.avail += n;
        }
        Ok(self.pos)
    }

    /// Flush the consumed prefix to the pack, folding it into the
    /// pack-wide digest, and slide the unconsumed tail to the front.
    pub(crate) fn sync(&mut self) -> Result<(), IndexError> {
        if self.pos == 0 {
            return Ok(());
        }
        if let Some(digest) = self.digest.as_mut() {
            digest.update(&self.buf[..self.pos]);
        }
        self.pack.file_mut().write_all(&self.buf[..self.pos])?;
        self.buf.copy_within(self.pos..self.pos + self.avail, 0);
        self.base += self.pos as u64;
        self.pos = 0;
        Ok(())
    }

    /// Buffer and expose `n` bytes without consuming them.
    pub(crate) fn peek(&mut self, src: Source, n: usize) -> Result<&[u8], IndexError> {
        let p = self.fill(src, n)?;
        Ok(&self.buf[p..p + n])
    }

    /// Advance over `n` already-buffered bytes. CRC accounting is the
    /// call site's concern.
    pub(crate) fn use_bytes(&mut self, n: usize) {
        debug_assert!(n <= self.avail);
        self.pos += n;
        self.avail -= n;
    }

    /// Consume one byte, feeding the per-record CRC32.
    pub(crate) fn read_byte(&mut self, src: Source) -> Result<u8, IndexError> {
        let p = self.fill(src, 1)?;
        let byte = self.buf[p];
        self.crc.update(&[byte]);
        self.use_bytes(1);
        Ok(byte)
    }

    /// Consume exactly `out.len()` bytes, feeding the per-record CRC32.
    pub(crate) fn read_exact_crc(&mut self, src: Source, out: &mut [u8]) -> Result<(), IndexError> {
        let p = self.fill(src, out.len())?;
        out.copy_from_slice(&self.buf[p..p + out.len()]);
        self.crc.update(out);
        self.use_bytes(out.len());
        Ok(())
    }

    /// Reposition reads onto the on-disk pack at `pos`, discarding buffer
    /// state. Subsequent fills must use [`Source::File`]. Callers only
    /// switch to file mode once the streaming pass has synced everything
    /// it consumed.
    pub(crate) fn seek(&mut self, pos: u64) -> Result<(), IndexError> {
        self.pack.file_mut().seek(SeekFrom::Start(pos))?;
        self.base = pos;
        self.pos = 0;
        self.avail = 0;
        Ok(())
    }

    /// Take the pack-wide digest for trailer comparison. Later syncs
    /// still write bytes to disk but no longer digest them.
    pub(crate) fn take_digest(&mut self) -> Hasher {
        self.digest.take().unwrap_or_default()
    }

    /// Inflate one zlib stream, expecting exactly `expected` output bytes.
    pub(crate) fn inflate(
        &mut self,
        src: Source,
        offset: u64,
        expected: u64,
    ) -> Result<Vec<u8>, IndexError> {
        let mut out = Vec::with_capacity(expected.min(1 << 20) as usize);
        self.inflate_inner(src, offset, expected, Some(&mut out))?;
        Ok(out)
    }

    /// Inflate one zlib stream to the void, advancing position and CRC32.
    pub(crate) fn skip_inflate(
        &mut self,
        src: Source,
        offset: u64,
        expected: u64,
    ) -> Result<(), IndexError> {
        self.inflate_inner(src, offset, expected, None)
    }

    fn inflate_inner(
        &mut self,
        src: Source,
        offset: u64,
        expected: u64,
        mut out: Option<&mut Vec<u8>>,
    ) -> Result<(), IndexError> {
        self.inflater.reset(true);
        let mut chunk = [0u8; BUFFER_SIZE];

        loop {
            if self.avail == 0 {
                self.fill(src, 1)?;
            }
            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(
                    &self.buf[self.pos..self.pos + self.avail],
                    &mut chunk,
                    FlushDecompress::None,
                )
                .map_err(|_| IndexError::BadCompression(offset))?;
            let consumed = (self.inflater.total_in() - before_in) as usize;
            let written = (self.inflater.total_out() - before_out) as usize;

            self.crc.update(&self.buf[self.pos..self.pos + consumed]);
            self.use_bytes(consumed);
            if let Some(v) = out.as_deref_mut() {
                v.extend_from_slice(&chunk[..written]);
            }

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if consumed == 0 && written == 0 {
                        return Err(IndexError::BadCompression(offset));
                    }
                }
            }
        }

        let actual = self.inflater.total_out();
        if actual != expected {
            return Err(IndexError::SizeMismatch {
                offset,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Current length of the staged pack on disk.
    pub(crate) fn pack_len(&mut self) -> Result<u64, IndexError> {
        Ok(self.pack.file_mut().metadata()?.len())
    }

    /// Write raw bytes at an absolute position, used when the thin-pack
    /// completer appends synthesized records.
    pub(crate) fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<(), IndexError> {
        let file = self.pack.file_mut();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Truncate the staged pack, dropping stale bytes past `len`.
    pub(crate) fn set_pack_len(&mut self, len: u64) -> Result<(), IndexError> {
        self.pack.file_mut().set_len(len)?;
        Ok(())
    }

    /// Raw access to the staged pack for the header/trailer repair pass.
    /// Buffered read state is only valid again after a [`seek`](Self::seek).
    pub(crate) fn file_mut(&mut self) -> &mut File {
        self.pack.file_mut()
    }

    /// Flush the staged pack to stable storage.
    pub(crate) fn sync_pack(&mut self) -> Result<(), IndexError> {
        self.pack.file_mut().sync_all()?;
        Ok(())
    }

    /// Hand the staged pack over for publication.
    pub(crate) fn into_pack(self) -> TempFile {
        self.pack
    }
}
