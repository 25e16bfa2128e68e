// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Byte-level file backends.
//!
//! A segment talks to its file through [`FileIo`]. The standard backend
//! supports appends and positional reads; the memory-mapped backend is
//! read-only and exists to speed up the scan-heavy index rebuild at startup.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    os::unix::fs::FileExt,
    path::Path,
};

/// Which backend a segment file is opened with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IoKind {
    /// Positional reads and appending writes
    Standard,

    /// Read-only memory map
    MemoryMap,
}

pub trait FileIo: Send + Sync {
    /// Fills `buf` from the given byte offset.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()>;

    /// Appends the buffer at the end of the file.
    fn append(&mut self, bytes: &[u8]) -> std::io::Result<usize>;

    /// Persists written data to disk.
    fn sync(&self) -> std::io::Result<()>;

    /// Returns the current file size.
    fn len(&self) -> std::io::Result<u64>;

    /// Cuts the file down to `len` bytes.
    fn truncate(&self, len: u64) -> std::io::Result<()>;
}

pub fn open(path: &Path, kind: IoKind) -> std::io::Result<Box<dyn FileIo>> {
    match kind {
        IoKind::Standard => Ok(Box::new(StdFileIo::open(path)?)),
        IoKind::MemoryMap => Ok(Box::new(MmapFileIo::open(path)?)),
    }
}

/// Standard file I/O (one descriptor per segment).
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self { file })
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    fn append(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.file.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn sync(&self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    fn len(&self) -> std::io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> std::io::Result<()> {
        self.file.set_len(len)
    }
}

/// Read-only memory-mapped backend.
///
/// Must never be installed on the active segment: appends and syncs panic.
pub struct MmapFileIo {
    // Zero-length files cannot be mapped
    mmap: Option<memmap2::Mmap>,
}

impl MmapFileIo {
    #[allow(unsafe_code)]
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;

        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: The engine holds the directory lock, so no other process
            // mutates the file, and segments read through a map are immutable
            // within this process.
            Some(unsafe { memmap2::Mmap::map(&file)? })
        };

        Ok(Self { mmap })
    }
}

impl FileIo for MmapFileIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        let eof = || {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of memory map",
            )
        };

        let mmap = self.mmap.as_ref().ok_or_else(eof)?;
        let offset = usize::try_from(offset).map_err(|_| eof())?;
        let end = offset.checked_add(buf.len()).ok_or_else(eof)?;

        let slice = mmap.get(offset..end).ok_or_else(eof)?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    fn append(&mut self, _bytes: &[u8]) -> std::io::Result<usize> {
        panic!("cannot append to a memory-mapped segment");
    }

    fn sync(&self) -> std::io::Result<()> {
        panic!("cannot sync a memory-mapped segment");
    }

    fn len(&self) -> std::io::Result<u64> {
        Ok(self.mmap.as_ref().map_or(0, |m| m.len() as u64))
    }

    fn truncate(&self, _len: u64) -> std::io::Result<()> {
        panic!("cannot truncate a memory-mapped segment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn std_io_append_then_read() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("file");

        let mut io = StdFileIo::open(&path)?;
        io.append(b"hello ")?;
        io.append(b"world")?;
        io.sync()?;

        assert_eq!(11, io.len()?);

        let mut buf = [0; 5];
        io.read_at(&mut buf, 6)?;
        assert_eq!(b"world", &buf);

        Ok(())
    }

    #[test]
    fn mmap_reads_match_std_io() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("file");

        let mut io = StdFileIo::open(&path)?;
        io.append(b"abcdefgh")?;
        io.sync()?;

        let mapped = MmapFileIo::open(&path)?;
        assert_eq!(8, mapped.len()?);

        let mut buf = [0; 4];
        mapped.read_at(&mut buf, 2)?;
        assert_eq!(b"cdef", &buf);

        assert!(mapped.read_at(&mut buf, 6).is_err());

        Ok(())
    }

    #[test]
    fn mmap_empty_file() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("file");
        File::create(&path)?;

        let mapped = MmapFileIo::open(&path)?;
        assert_eq!(0, mapped.len()?);

        let mut buf = [0; 1];
        assert!(mapped.read_at(&mut buf, 0).is_err());

        Ok(())
    }
}
