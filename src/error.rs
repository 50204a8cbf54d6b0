// SPDX-License-Identifier: MIT

use crate::storage::UploadedFile;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error returned by caller-supplied file filters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable limit codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitCode {
    PartCount,
    FileSize,
    FileCount,
    FieldKey,
    FieldValue,
    FieldCount,
    UnexpectedFile,
}

impl LimitCode {
    /// The string identifier callers match on, e.g. `LIMIT_FILE_SIZE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitCode::PartCount => "LIMIT_PART_COUNT",
            LimitCode::FileSize => "LIMIT_FILE_SIZE",
            LimitCode::FileCount => "LIMIT_FILE_COUNT",
            LimitCode::FieldKey => "LIMIT_FIELD_KEY",
            LimitCode::FieldValue => "LIMIT_FIELD_VALUE",
            LimitCode::FieldCount => "LIMIT_FIELD_COUNT",
            LimitCode::UnexpectedFile => "LIMIT_UNEXPECTED_FILE",
        }
    }

    /// Human readable message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            LimitCode::PartCount => "Too many parts",
            LimitCode::FileSize => "File too large",
            LimitCode::FileCount => "Too many files",
            LimitCode::FieldKey => "Field name too long",
            LimitCode::FieldValue => "Field value too long",
            LimitCode::FieldCount => "Too many fields",
            LimitCode::UnexpectedFile => "Unexpected field",
        }
    }
}

impl fmt::Display for LimitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Transport and wire-format failures raised by the tokenizer and header parser.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("Multipart: {0}")]
    MalformedBoundary(String),
    #[error("Unexpected end of multipart data")]
    UnexpectedEnd,
    #[error("Malformed part header: {0}")]
    InvalidPartHeader(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MultipartError {
    pub fn malformed_boundary<S: Into<String>>(msg: S) -> Self {
        MultipartError::MalformedBoundary(msg.into())
    }

    pub fn invalid_header<S: Into<String>>(msg: S) -> Self {
        MultipartError::InvalidPartHeader(msg.into())
    }
}

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not read or write the path; the I/O error is kept as-is.
    #[error("{source} (path: {})", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file stream ended with an error (limit truncation or client abort).
    #[error("file stream interrupted: {0}")]
    Stream(std::io::Error),
    /// A backend-specific failure carrying its own code.
    #[error("{message}")]
    Backend { code: String, message: String },
}

impl StorageError {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        StorageError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Backend code, if the backend supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::Backend { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The underlying I/O error for filesystem failures.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            StorageError::Io { source, .. } => Some(source),
            StorageError::Stream(err) => Some(err),
            StorageError::Backend { .. } => None,
        }
    }
}

/// What went wrong in an upload run.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    Limit(LimitCode),
    #[error("{0}")]
    Filter(BoxError),
    #[error(transparent)]
    Storage(StorageError),
}

/// A storage removal that failed while rolling back an aborted run.
#[derive(Debug, Error)]
#[error("failed to remove file for field '{field}': {error}")]
pub struct CleanupError {
    pub field: String,
    pub file: UploadedFile,
    #[source]
    pub error: StorageError,
}

/// The single terminal error of an aborted upload run.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ProcessingError {
    pub kind: ErrorKind,
    pub field: Option<String>,
    pub storage_errors: Vec<CleanupError>,
}

impl ProcessingError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            field: None,
            storage_errors: Vec::new(),
        }
    }

    pub fn limit(code: LimitCode) -> Self {
        Self::new(ErrorKind::Limit(code))
    }

    pub fn with_field<S: Into<String>>(mut self, field: S) -> Self {
        self.field = Some(field.into());
        self
    }

    /// The stable limit code string, `None` for transport, filter and storage errors.
    pub fn code(&self) -> Option<&'static str> {
        match &self.kind {
            ErrorKind::Limit(code) => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn limit_code(&self) -> Option<LimitCode> {
        match &self.kind {
            ErrorKind::Limit(code) => Some(*code),
            _ => None,
        }
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Checks if the error came from the wire format rather than policy.
    pub fn is_transport_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Multipart(_))
    }
}

impl From<MultipartError> for ProcessingError {
    fn from(err: MultipartError) -> Self {
        ProcessingError::new(ErrorKind::Multipart(err))
    }
}
