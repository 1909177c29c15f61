//! File-backed non-volatile region
//!
//! Stands in for a reserved memory area on hosted platforms: the region is a
//! fixed-size file, so its contents survive process restarts.

use crate::nv_memory::{check_range, NonVolatileMemory, NvError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Non-volatile region stored in a file
pub struct FileNvMemory {
    file: File,
    path: PathBuf,
    capacity: usize,
}

impl FileNvMemory {
    /// Opens (or creates) the backing file and sizes it to `capacity` bytes
    ///
    /// Existing contents within `capacity` are preserved.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, NvError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| NvError::Io(format!("{}: {}", path.display(), e)))?;
        file.set_len(capacity as u64)
            .map_err(|e| NvError::Io(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), capacity, "Opened file-backed NV region");

        Ok(Self {
            file,
            path,
            capacity,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seek(&mut self, offset: usize) -> Result<(), NvError> {
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map(|_| ())
            .map_err(|e| NvError::Io(e.to_string()))
    }
}

impl NonVolatileMemory for FileNvMemory {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), NvError> {
        check_range(offset, buffer.len(), self.capacity)?;
        self.seek(offset)?;
        self.file
            .read_exact(buffer)
            .map_err(|e| NvError::Io(e.to_string()))
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), NvError> {
        check_range(offset, data.len(), self.capacity)?;
        self.seek(offset)?;
        self.file
            .write_all(data)
            .map_err(|e| NvError::Io(e.to_string()))
    }

    fn flush(&mut self) -> Result<(), NvError> {
        self.file.sync_data().map_err(|e| NvError::Io(e.to_string()))
    }
}
