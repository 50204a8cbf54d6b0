// SPDX-License-Identifier: MIT

//! Filesystem storage
//!
//! Files are streamed into a temporary file inside the destination directory
//! and renamed into place once complete, so a reader never observes a
//! partially written upload under its final name.

use super::{FileInfo, StorageEngine, StorageHandle, UploadedFile};
use crate::error::StorageError;
use log::{debug, error, info, warn};
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Temporary file prefix for atomic operations
const TEMP_FILE_PREFIX: &str = ".formdrop_temp_";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

type DestinationFn = dyn Fn(&FileInfo) -> Result<PathBuf, StorageError> + Send + Sync;
type FilenameFn = dyn Fn(&FileInfo) -> Result<String, StorageError> + Send + Sync;

/// Directory a file is written to.
#[derive(Clone)]
pub enum Destination {
    /// Fixed directory, created when the storage is built
    Static(PathBuf),
    /// Directory chosen per file; never created by the storage
    Dynamic(Arc<DestinationFn>),
}

impl Destination {
    pub fn dynamic<F>(resolve: F) -> Self
    where
        F: Fn(&FileInfo) -> Result<PathBuf, StorageError> + Send + Sync + 'static,
    {
        Destination::Dynamic(Arc::new(resolve))
    }

    fn resolve(&self, info: &FileInfo) -> Result<PathBuf, StorageError> {
        match self {
            Destination::Static(path) => Ok(path.clone()),
            Destination::Dynamic(resolve) => resolve(info),
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Static(path) => f.debug_tuple("Static").field(path).finish(),
            Destination::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// How the final filename is chosen.
#[derive(Clone, Default)]
pub enum FilenameStrategy {
    /// 32 hex characters, no extension
    #[default]
    Random,
    /// The client-supplied name, sanitized
    Original,
    /// Caller-supplied naming function
    Custom(Arc<FilenameFn>),
}

impl FilenameStrategy {
    pub fn custom<F>(name: F) -> Self
    where
        F: Fn(&FileInfo) -> Result<String, StorageError> + Send + Sync + 'static,
    {
        FilenameStrategy::Custom(Arc::new(name))
    }

    fn resolve(&self, info: &FileInfo) -> Result<String, StorageError> {
        match self {
            FilenameStrategy::Random => Ok(random_hex()),
            FilenameStrategy::Original => sanitize_filename(&info.original_name),
            FilenameStrategy::Custom(name) => name(info),
        }
    }
}

impl fmt::Debug for FilenameStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilenameStrategy::Random => f.write_str("Random"),
            FilenameStrategy::Original => f.write_str("Original"),
            FilenameStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Writes each file into a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    destination: Destination,
    filename: FilenameStrategy,
}

impl DiskStorage {
    /// Create a disk storage. A static destination is created if missing.
    pub fn new(destination: Destination) -> Result<Self, StorageError> {
        if let Destination::Static(dir) = &destination {
            ensure_directory_exists(dir)?;
        }

        Ok(Self {
            destination,
            filename: FilenameStrategy::default(),
        })
    }

    /// Disk storage writing random names into the OS temp directory.
    pub fn temp() -> Result<Self, StorageError> {
        Self::new(Destination::Static(std::env::temp_dir()))
    }

    pub fn in_dir<P: Into<PathBuf>>(dir: P) -> Result<Self, StorageError> {
        Self::new(Destination::Static(dir.into()))
    }

    pub fn with_filename(mut self, filename: FilenameStrategy) -> Self {
        self.filename = filename;
        self
    }

    /// Stream into a temporary file, then rename it to `target_path`.
    fn write_file_atomically(
        &self,
        destination: &Path,
        target_path: &Path,
        stream: &mut dyn Read,
    ) -> Result<u64, StorageError> {
        let temp_path = destination.join(format!("{TEMP_FILE_PREFIX}{}.tmp", random_hex()));

        let mut temp_file = File::create(&temp_path).map_err(|e| {
            error!("Failed to create temporary file {temp_path:?}: {e}");
            StorageError::io(&temp_path, e)
        })?;

        let written = match copy_stream(stream, &mut temp_file, &temp_path) {
            Ok(written) => written,
            Err(e) => {
                drop(temp_file);
                discard_temp_file(&temp_path);
                return Err(e);
            }
        };

        if let Err(e) = temp_file.sync_all() {
            error!("Failed to sync temporary file {temp_path:?}: {e}");
            discard_temp_file(&temp_path);
            return Err(StorageError::io(&temp_path, e));
        }
        drop(temp_file);

        fs::rename(&temp_path, target_path).map_err(|e| {
            error!("Failed to rename {temp_path:?} to {target_path:?}: {e}");
            discard_temp_file(&temp_path);
            StorageError::io(target_path, e)
        })?;

        debug!("Wrote {written} bytes atomically to {target_path:?}");
        Ok(written)
    }
}

impl StorageEngine for DiskStorage {
    fn store(&self, info: &FileInfo, stream: &mut dyn Read) -> Result<UploadedFile, StorageError> {
        let destination = self.destination.resolve(info)?;
        let filename = self.filename.resolve(info)?;
        let path = destination.join(&filename);

        let size = self.write_file_atomically(&destination, &path, stream)?;

        Ok(UploadedFile::new(
            info,
            size,
            StorageHandle::Disk {
                destination,
                filename,
                path,
            },
        ))
    }

    fn remove(&self, file: &UploadedFile) -> Result<(), StorageError> {
        match &file.handle {
            StorageHandle::Disk { path, .. } => {
                fs::remove_file(path).map_err(|e| StorageError::io(path, e))?;
                debug!("Removed {path:?}");
                Ok(())
            }
            _ => Err(StorageError::new(
                "INVALID_HANDLE",
                "file was not stored on disk",
            )),
        }
    }
}

/// Copy the upload stream, keeping read and write failures apart.
fn copy_stream(
    stream: &mut dyn Read,
    file: &mut File,
    temp_path: &Path,
) -> Result<u64, StorageError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = match stream.read(&mut buffer) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::Stream(e)),
        };
        file.write_all(&buffer[..n]).map_err(|e| {
            error!("Failed to write to temporary file {temp_path:?}: {e}");
            StorageError::io(temp_path, e)
        })?;
        written += n as u64;
    }
}

/// Ensure the target directory exists, create if necessary
fn ensure_directory_exists(dir: &Path) -> Result<(), StorageError> {
    if !dir.exists() {
        info!("Creating upload directory: {dir:?}");
        fs::create_dir_all(dir).map_err(|e| {
            error!("Failed to create upload directory {dir:?}: {e}");
            StorageError::io(dir, e)
        })?;
    } else if !dir.is_dir() {
        return Err(StorageError::io(
            dir,
            std::io::Error::new(ErrorKind::NotADirectory, "upload path is not a directory"),
        ));
    }
    Ok(())
}

/// Sanitize a client filename to prevent path traversal attacks
fn sanitize_filename(filename: &str) -> Result<String, StorageError> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(StorageError::new(
            "INVALID_FILENAME",
            format!("Invalid filename: {filename}"),
        ));
    }

    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();

    if sanitized.trim().is_empty() {
        return Err(StorageError::new(
            "INVALID_FILENAME",
            "Empty filename after sanitization",
        ));
    }

    // Never produce hidden files
    Ok(if sanitized.starts_with('.') {
        format!("file{sanitized}")
    } else {
        sanitized
    })
}

/// 32 lowercase hex characters from a random v4 UUID.
fn random_hex() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Remove a temporary file left behind by a failed write.
fn discard_temp_file(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove temporary file {temp_path:?}: {e}");
        }
    }
}
