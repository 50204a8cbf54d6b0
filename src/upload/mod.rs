// SPDX-License-Identifier: MIT

//! Multipart upload engine
//!
//! [`UploadHandler`] is built once with a storage backend, an
//! [`UploadSchema`], [`Limits`] and an optional [`FileFilter`], then shared
//! across threads. Each call to [`UploadHandler::process`] decodes one
//! request body:
//!
//! - text fields are collected into a [`FieldMap`],
//! - accepted files are streamed to storage by scoped store workers while
//!   decoding continues,
//! - the first violated limit, filter error or store failure aborts the run,
//!   and every file already stored for the request is removed again.
//!
//! # Example
//! ```rust
//! use formdrop::storage::MemoryStorage;
//! use formdrop::upload::{Limits, UploadHandler, UploadSchema};
//! use std::collections::HashMap;
//!
//! # fn main() -> Result<(), formdrop::error::ProcessingError> {
//! let handler = UploadHandler::new(MemoryStorage::new(), UploadSchema::single("avatar"))
//!     .with_limits(Limits::unbounded().with_file_size(1024 * 1024));
//!
//! let body = b"--XyZ\r\n\
//!     Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
//!     Content-Type: image/png\r\n\
//!     \r\n\
//!     PNGDATA\r\n\
//!     --XyZ--\r\n";
//! let mut headers = HashMap::new();
//! headers.insert("content-type".to_string(), "multipart/form-data; boundary=XyZ".to_string());
//!
//! let result = handler.process(&headers, &body[..])?.expect("multipart request");
//! let avatar = result.files.single().expect("file stored");
//! assert_eq!(avatar.original_name, "me.png");
//! assert_eq!(avatar.size, 7);
//! # Ok(())
//! # }
//! ```

pub mod limits;
pub mod schema;

pub use limits::Limits;
pub use schema::{FieldSpec, SlotCounter, UploadSchema};

use crate::dispatch::{self, Dispatcher, StoreResults};
use crate::error::{ErrorKind, LimitCode, MultipartError, ProcessingError, StorageError};
use crate::fields::FieldMap;
use crate::filter::FileFilter;
use crate::http::Request;
use crate::multipart::{
    MultipartConfig, MultipartReader, PartHeaders, extract_boundary, is_multipart,
};
use crate::storage::{FileInfo, StorageEngine, UploadedFile};
use crate::utils::{decode_charset, format_bytes};
use limits::exceeds;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread;

/// Bytes pulled from the tokenizer per body read
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// Files of one field name, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMap {
    entries: Vec<(String, Vec<UploadedFile>)>,
    index: HashMap<String, usize>,
}

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&[UploadedFile]> {
        self.index
            .get(field)
            .map(|&index| self.entries[index].1.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[UploadedFile])> {
        self.entries
            .iter()
            .map(|(name, files)| (name.as_str(), files.as_slice()))
    }

    /// Number of distinct field names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, file: UploadedFile) {
        match self.index.get(&file.field_name) {
            Some(&index) => self.entries[index].1.push(file),
            None => {
                self.index.insert(file.field_name.clone(), self.entries.len());
                self.entries.push((file.field_name.clone(), vec![file]));
            }
        }
    }
}

/// Stored files, shaped by the handler's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadedFiles {
    Single(Option<UploadedFile>),
    Array(Vec<UploadedFile>),
    Fields(FileMap),
    Any(Vec<UploadedFile>),
    None,
}

impl UploadedFiles {
    fn collect(schema: &UploadSchema, files: Vec<UploadedFile>) -> Self {
        match schema {
            UploadSchema::Single(_) => UploadedFiles::Single(files.into_iter().next()),
            UploadSchema::Array { .. } => UploadedFiles::Array(files),
            UploadSchema::Fields(_) => {
                let mut map = FileMap::new();
                for file in files {
                    map.push(file);
                }
                UploadedFiles::Fields(map)
            }
            UploadSchema::Any => UploadedFiles::Any(files),
            UploadSchema::None => UploadedFiles::None,
        }
    }

    /// The file of a single-file upload.
    pub fn single(&self) -> Option<&UploadedFile> {
        match self {
            UploadedFiles::Single(file) => file.as_ref(),
            _ => None,
        }
    }

    /// Files of an array or any-field upload, in arrival order.
    pub fn as_slice(&self) -> Option<&[UploadedFile]> {
        match self {
            UploadedFiles::Array(files) | UploadedFiles::Any(files) => Some(files),
            _ => None,
        }
    }

    /// Files stored under `field` in a named-fields upload.
    pub fn field(&self, field: &str) -> Option<&[UploadedFile]> {
        match self {
            UploadedFiles::Fields(map) => map.get(field),
            _ => None,
        }
    }

    /// All stored files. Named-fields uploads are grouped by field.
    pub fn all(&self) -> Vec<&UploadedFile> {
        match self {
            UploadedFiles::Single(file) => file.iter().collect(),
            UploadedFiles::Array(files) | UploadedFiles::Any(files) => files.iter().collect(),
            UploadedFiles::Fields(map) => map.iter().flat_map(|(_, files)| files).collect(),
            UploadedFiles::None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded form of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub fields: FieldMap,
    pub files: UploadedFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Tokenizing,
    PartInProgress,
    Finalizing,
    Completed,
    Aborted,
}

/// Mutable state of a single `process` call.
#[derive(Debug)]
struct RequestContext {
    state: RunState,
    parts: usize,
    fields_seen: usize,
    files_seen: usize,
    file_bytes: u64,
    slots: SlotCounter,
    fields: FieldMap,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            parts: 0,
            fields_seen: 0,
            files_seen: 0,
            file_bytes: 0,
            slots: SlotCounter::new(),
            fields: FieldMap::new(),
        }
    }

    fn transition(&mut self, next: RunState) {
        // Aborted is terminal
        if self.state == RunState::Aborted {
            return;
        }
        trace!("Upload state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Why part consumption stopped early.
enum Halt {
    Error(ProcessingError),
    /// A store worker failed; the primary error is picked from the results
    StoreFailed,
}

impl From<ProcessingError> for Halt {
    fn from(err: ProcessingError) -> Self {
        Halt::Error(err)
    }
}

impl From<MultipartError> for Halt {
    fn from(err: MultipartError) -> Self {
        Halt::Error(err.into())
    }
}

/// Immutable, thread-safe multipart upload processor.
#[derive(Clone)]
pub struct UploadHandler {
    storage: Arc<dyn StorageEngine>,
    schema: UploadSchema,
    limits: Limits,
    filter: Option<Arc<dyn FileFilter>>,
    multipart_config: MultipartConfig,
}

impl fmt::Debug for UploadHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandler")
            .field("schema", &self.schema)
            .field("limits", &self.limits)
            .field("filter", &self.filter.is_some())
            .field("multipart_config", &self.multipart_config)
            .finish_non_exhaustive()
    }
}

impl UploadHandler {
    pub fn new<S: StorageEngine + 'static>(storage: S, schema: UploadSchema) -> Self {
        Self::with_shared_storage(Arc::new(storage), schema)
    }

    /// Build a handler around a storage backend shared with other handlers.
    pub fn with_shared_storage(storage: Arc<dyn StorageEngine>, schema: UploadSchema) -> Self {
        Self {
            storage,
            schema,
            limits: Limits::default(),
            filter: None,
            multipart_config: MultipartConfig::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_filter<F: FileFilter + 'static>(mut self, filter: F) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_multipart_config(mut self, config: MultipartConfig) -> Self {
        self.multipart_config = config;
        self
    }

    pub fn schema(&self) -> &UploadSchema {
        &self.schema
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn storage(&self) -> &dyn StorageEngine {
        self.storage.as_ref()
    }

    /// Decode `request` and attach the result to it. Requests that are not
    /// multipart are left untouched.
    pub fn handle<R: Read>(&self, request: &mut Request<R>) -> Result<(), ProcessingError> {
        if let Some(result) = self.process(&request.headers, &mut request.body)? {
            request.fields = Some(result.fields);
            request.files = Some(result.files);
        }
        Ok(())
    }

    /// Decode a multipart body. Returns `Ok(None)` when the Content-Type is
    /// missing or not `multipart/form-data`.
    pub fn process<R: Read>(
        &self,
        headers: &HashMap<String, String>,
        body: R,
    ) -> Result<Option<UploadResult>, ProcessingError> {
        let Some(content_type) = header_value(headers, "content-type") else {
            debug!("No Content-Type header, skipping multipart processing");
            return Ok(None);
        };
        if !is_multipart(content_type) {
            debug!("Content-Type '{content_type}' is not multipart/form-data, skipping");
            return Ok(None);
        }

        let boundary = extract_boundary(content_type)?;
        let mut config = self.multipart_config.clone();
        if self.limits.header_pairs.is_some() {
            config.max_header_pairs = self.limits.header_pairs;
        }
        let mut reader = MultipartReader::new(body, &boundary, config)?;
        let mut ctx = RequestContext::new();
        let storage = self.storage.as_ref();

        let (outcome, results) = thread::scope(|scope| {
            let mut dispatcher = Dispatcher::new(scope, storage);
            let outcome = self.consume_parts(&mut ctx, &mut reader, &mut dispatcher);
            (outcome, dispatcher.join_all())
        });

        self.finalize(ctx, outcome, results).map(Some)
    }

    fn consume_parts<R: Read>(
        &self,
        ctx: &mut RequestContext,
        reader: &mut MultipartReader<R>,
        dispatcher: &mut Dispatcher<'_, '_>,
    ) -> Result<(), Halt> {
        ctx.transition(RunState::Tokenizing);

        while let Some(part) = reader.next_part()? {
            ctx.transition(RunState::PartInProgress);
            self.classify(ctx, reader, dispatcher, &part)?;

            if dispatcher.first_failure().is_some() {
                return Err(Halt::StoreFailed);
            }
            ctx.transition(RunState::Tokenizing);
        }

        ctx.transition(RunState::Finalizing);
        Ok(())
    }

    /// Apply limits, schema and filter to one part.
    fn classify<R: Read>(
        &self,
        ctx: &mut RequestContext,
        reader: &mut MultipartReader<R>,
        dispatcher: &mut Dispatcher<'_, '_>,
        part: &PartHeaders,
    ) -> Result<(), Halt> {
        ctx.parts += 1;
        if exceeds(self.limits.part_count, ctx.parts) {
            return Err(ProcessingError::limit(LimitCode::PartCount).into());
        }

        let field = part.field_name();
        if exceeds(self.limits.field_name_size, field.len()) {
            return Err(ProcessingError::limit(LimitCode::FieldKey)
                .with_field(field)
                .into());
        }

        let Some(original_name) = part.filename() else {
            return self.collect_field(ctx, reader, part);
        };

        if original_name.is_empty() {
            let skipped = reader.drain_body()?;
            debug!("Skipping file part '{field}' without filename ({skipped} bytes)");
            return Ok(());
        }

        if !ctx.slots.claim(&self.schema, field) {
            return Err(ProcessingError::limit(LimitCode::UnexpectedFile)
                .with_field(field)
                .into());
        }

        ctx.files_seen += 1;
        if exceeds(self.limits.file_count, ctx.files_seen) {
            return Err(ProcessingError::limit(LimitCode::FileCount)
                .with_field(field)
                .into());
        }

        let info = FileInfo {
            field_name: field.to_string(),
            original_name: original_name.to_string(),
            encoding: part.encoding(),
            mime_type: part.mime_type(),
        };

        if let Some(filter) = &self.filter {
            match filter.accept(&info) {
                Ok(true) => {}
                Ok(false) => {
                    let skipped = reader.drain_body()?;
                    debug!("Filter rejected '{original_name}' for field '{field}' ({skipped} bytes)");
                    return Ok(());
                }
                Err(e) => {
                    return Err(ProcessingError::new(ErrorKind::Filter(e))
                        .with_field(field)
                        .into());
                }
            }
        }

        self.store_file(ctx, reader, dispatcher, info)
    }

    fn collect_field<R: Read>(
        &self,
        ctx: &mut RequestContext,
        reader: &mut MultipartReader<R>,
        part: &PartHeaders,
    ) -> Result<(), Halt> {
        let field = part.field_name();

        ctx.fields_seen += 1;
        if exceeds(self.limits.field_count, ctx.fields_seen) {
            return Err(ProcessingError::limit(LimitCode::FieldCount)
                .with_field(field)
                .into());
        }

        let mut value = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read_body(&mut buf)?;
            if n == 0 {
                break;
            }
            if exceeds(self.limits.field_value_size, (value.len() + n) as u64) {
                return Err(ProcessingError::limit(LimitCode::FieldValue)
                    .with_field(field)
                    .into());
            }
            value.extend_from_slice(&buf[..n]);
        }

        let charset = part.charset().unwrap_or_default();
        let text = decode_charset(&value, &charset);
        debug!("Field '{field}' ({} bytes)", value.len());
        ctx.fields.append(field, text);
        Ok(())
    }

    /// Hand the part body to a store worker, enforcing the file size ceiling.
    fn store_file<R: Read>(
        &self,
        ctx: &mut RequestContext,
        reader: &mut MultipartReader<R>,
        dispatcher: &mut Dispatcher<'_, '_>,
        info: FileInfo,
    ) -> Result<(), Halt> {
        let field = info.field_name.clone();
        debug!(
            "Dispatching '{}' for field '{field}' ({})",
            info.original_name, info.mime_type
        );

        let mut sink = dispatcher.dispatch(info).map_err(|e| {
            ProcessingError::new(ErrorKind::Storage(e)).with_field(field.as_str())
        })?;

        let mut buf = vec![0u8; BODY_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read_body(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    sink.abort();
                    return Err(e.into());
                }
            };
            if n == 0 {
                sink.finish();
                ctx.file_bytes += total;
                return Ok(());
            }

            let next_total = total + n as u64;
            if let Some(max) = self.limits.file_size.filter(|max| next_total > *max) {
                // Deliver up to the ceiling, then fail the stream
                let allowed = (max - total) as usize;
                if allowed > 0 {
                    sink.send(&buf[..allowed]);
                }
                sink.truncate();
                return Err(ProcessingError::limit(LimitCode::FileSize)
                    .with_field(field)
                    .into());
            }
            total = next_total;

            if !sink.send(&buf[..n]) {
                // The worker stopped reading; settle it so its outcome is known
                dispatcher.settle_last();
                reader.drain_body()?;
                return Ok(());
            }
        }
    }

    fn finalize(
        &self,
        mut ctx: RequestContext,
        outcome: Result<(), Halt>,
        results: StoreResults,
    ) -> Result<UploadResult, ProcessingError> {
        let outcome = outcome.and_then(|()| {
            if results.iter().any(|store| store.result.is_err()) {
                Err(Halt::StoreFailed)
            } else {
                Ok(())
            }
        });

        let halt = match outcome {
            Ok(()) => {
                let files: Vec<UploadedFile> = results
                    .into_iter()
                    .filter_map(|store| store.result.ok())
                    .collect();
                ctx.transition(RunState::Completed);
                info!(
                    "Processed upload: {} fields, {} files ({})",
                    ctx.fields_seen,
                    files.len(),
                    format_bytes(ctx.file_bytes)
                );
                return Ok(UploadResult {
                    fields: ctx.fields,
                    files: UploadedFiles::collect(&self.schema, files),
                });
            }
            Err(halt) => halt,
        };

        ctx.transition(RunState::Aborted);
        let (cleanup_errors, failures) = dispatch::rollback(self.storage.as_ref(), results);

        let mut error = match halt {
            Halt::Error(error) => error,
            Halt::StoreFailed => match failures.into_iter().next() {
                Some((field, e)) => ProcessingError::new(ErrorKind::Storage(e)).with_field(field),
                None => ProcessingError::new(ErrorKind::Storage(StorageError::new(
                    "STORE_FAILED",
                    "file store failed",
                ))),
            },
        };
        error.storage_errors = cleanup_errors;

        warn!(
            "Upload aborted after {} parts: {error}{}",
            ctx.parts,
            error
                .field()
                .map(|field| format!(" (field '{field}')"))
                .unwrap_or_default()
        );
        Err(error)
    }
}

/// Case-insensitive header lookup.
fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
