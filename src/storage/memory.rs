// SPDX-License-Identifier: MIT

use super::{FileInfo, StorageEngine, StorageHandle, UploadedFile};
use crate::error::StorageError;
use std::io::Read;

/// Keeps each file's bytes in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorage;

impl MemoryStorage {
    pub fn new() -> Self {
        Self
    }
}

impl StorageEngine for MemoryStorage {
    fn store(&self, info: &FileInfo, stream: &mut dyn Read) -> Result<UploadedFile, StorageError> {
        let mut buffer = Vec::new();
        stream
            .read_to_end(&mut buffer)
            .map_err(StorageError::Stream)?;
        let size = buffer.len() as u64;
        Ok(UploadedFile::new(info, size, StorageHandle::Buffer(buffer)))
    }

    fn remove(&self, _file: &UploadedFile) -> Result<(), StorageError> {
        // The buffer is owned by the descriptor and dropped with it
        Ok(())
    }
}
