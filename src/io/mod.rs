//! Byte sources consumed by the decoders.
//!
//! The decoders never open files themselves. They read through the
//! [`ByteSource`] contract: a total size plus positional reads. A zero-byte
//! read before the requested length is satisfied is reported as
//! [`IoError::UnexpectedEof`], never as a silent short read.

pub mod error;

use crate::io::error::{IoError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Random-access source of bytes.
pub trait ByteSource {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes at the absolute `offset`.
    ///
    /// Returns the number of bytes read; `0` means end of data.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Fill `buf` completely from `offset`, looping over short reads.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let pos = offset
                .checked_add(filled as u64)
                .ok_or(IoError::UnexpectedEof {
                    offset,
                    wanted: buf.len(),
                    got: filled,
                })?;
            let n = match self.read_at(pos, &mut buf[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(IoError::UnexpectedEof {
                    offset,
                    wanted: buf.len(),
                    got: filled,
                });
            }
            filled += n;
        }
        Ok(())
    }

    /// Read exactly `len` bytes at `offset` into a fresh buffer.
    fn read_vec_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        // Refuse before allocating when the source cannot possibly hold `len` bytes.
        let available = self.size().saturating_sub(offset);
        if (len as u64) > available {
            return Err(IoError::UnexpectedEof {
                offset,
                wanted: len,
                got: available as usize,
            });
        }
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl ByteSource for [u8] {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ByteSource for Vec<u8> {
    fn size(&self) -> u64 {
        self.as_slice().size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }
}

impl ByteSource for Bytes {
    fn size(&self) -> u64 {
        self.as_ref().size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        self.as_ref().read_at(offset, buf)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read_at(offset, buf)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read_at(offset, buf)
    }
}

/// A plain file read with seek + read under a lock.
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_file(file)
    }

    pub fn from_file(file: File) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("file lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

/// Defines the resource limits for mapped sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
    /// The maximum total number of bytes that can be read across all operations.
    pub max_read_bytes: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 4 * 1024 * 1024 * 1024, // 4GB
            max_read_bytes: u64::MAX,
        }
    }
}

/// A read-only memory-mapped file with a size cap and a read budget.
pub struct MappedFile {
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
    limits: IOLimits,
    bytes_read: AtomicU64,
}

impl MappedFile {
    /// Opens and maps a file, failing if it exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Mapping file"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: read-only mapping of a regular file; callers must not
            // truncate the file while the map is alive.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            limits,
            bytes_read: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total bytes handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn limits(&self) -> &IOLimits {
        &self.limits
    }

    /// The whole mapping, or an empty slice for an empty file.
    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl ByteSource for MappedFile {
    fn size(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let current = self.bytes_read();
        if current.saturating_add(buf.len() as u64) > self.limits.max_read_bytes {
            warn!(
                path = %self.path.display(),
                current_read = current,
                requested = buf.len(),
                limit = self.limits.max_read_bytes,
                "Read limit exceeded"
            );
            return Err(std::io::Error::other(IoError::ReadLimitExceeded {
                limit: self.limits.max_read_bytes,
                current,
            }));
        }

        let n = self.as_slice().read_at(offset, buf)?;
        let total = self.bytes_read.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
        trace!(
            path = %self.path.display(),
            offset = offset,
            len = n,
            total_read = total,
            "Performed read"
        );
        Ok(n)
    }
}

/// Sequential `Read` adapter over a [`ByteSource`] window.
///
/// Wrap it in `std::io::BufReader` to consume a long run of small records
/// without one positional read per field.
pub struct SourceReader<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    pos: u64,
    end: u64,
}

impl<'a, S: ByteSource + ?Sized> SourceReader<'a, S> {
    /// Reads from `start` to the end of the source.
    pub fn new(source: &'a S, start: u64) -> Self {
        let end = source.size();
        Self {
            source,
            pos: start,
            end,
        }
    }

    /// Reads at most `len` bytes from `start`.
    pub fn with_len(source: &'a S, start: u64, len: u64) -> Self {
        let end = start.saturating_add(len).min(source.size());
        Self {
            source,
            pos: start,
            end,
        }
    }

    /// Absolute position of the next byte.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<S: ByteSource + ?Sized> Read for SourceReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.source.read_at(self.pos, &mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}
