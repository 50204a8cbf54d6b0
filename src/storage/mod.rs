// SPDX-License-Identifier: MIT

//! Pluggable file storage
//!
//! The upload engine streams every accepted file into a [`StorageEngine`] and
//! asks the same engine to remove stored files when a request is aborted.
//! Both calls may run concurrently from several store workers.

pub mod disk;
pub mod memory;

pub use disk::{Destination, DiskStorage, FilenameStrategy};
pub use memory::MemoryStorage;

use crate::error::StorageError;
use std::io::Read;
use std::path::PathBuf;

/// Metadata of a file part, handed to the filter and to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub field_name: String,
    pub original_name: String,
    pub encoding: String,
    pub mime_type: String,
}

/// Where a stored file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageHandle {
    /// Whole file held in memory
    Buffer(Vec<u8>),
    /// File written under `destination`
    Disk {
        destination: PathBuf,
        filename: String,
        path: PathBuf,
    },
    /// Opaque key of an external backend
    Key(String),
}

/// Descriptor of one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field_name: String,
    pub original_name: String,
    pub encoding: String,
    pub mime_type: String,
    pub size: u64,
    pub handle: StorageHandle,
}

impl UploadedFile {
    /// Build a descriptor from the part's metadata.
    pub fn new(info: &FileInfo, size: u64, handle: StorageHandle) -> Self {
        Self {
            field_name: info.field_name.clone(),
            original_name: info.original_name.clone(),
            encoding: info.encoding.clone(),
            mime_type: info.mime_type.clone(),
            size,
            handle,
        }
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.handle {
            StorageHandle::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match &self.handle {
            StorageHandle::Disk { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// A backend that persists uploaded file streams.
pub trait StorageEngine: Send + Sync {
    /// Consume `stream` and persist it. A read error from `stream` means the
    /// upload was cut short; the backend must then fail and keep nothing.
    fn store(&self, info: &FileInfo, stream: &mut dyn Read) -> Result<UploadedFile, StorageError>;

    /// Delete a file this backend stored earlier.
    fn remove(&self, file: &UploadedFile) -> Result<(), StorageError>;
}

impl<S: StorageEngine + ?Sized> StorageEngine for std::sync::Arc<S> {
    fn store(&self, info: &FileInfo, stream: &mut dyn Read) -> Result<UploadedFile, StorageError> {
        (**self).store(info, stream)
    }

    fn remove(&self, file: &UploadedFile) -> Result<(), StorageError> {
        (**self).remove(file)
    }
}
