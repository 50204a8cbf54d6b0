// SPDX-License-Identifier: MIT
#![allow(dead_code)]

use formdrop::error::{ProcessingError, StorageError};
use formdrop::storage::{FileInfo, MemoryStorage, StorageEngine, UploadedFile};
use formdrop::{UploadHandler, UploadResult};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

pub const BOUNDARY: &str = "----formdropTestBoundary7MA4YWxkTrZu0gW";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Size in bytes of each named test file.
pub fn fixture_size(name: &str) -> usize {
    match name {
        "empty" => 0,
        "tiny0" => 122,
        "tiny1" => 7,
        "small0" => 1778,
        "small1" => 315,
        "medium" => 13196,
        "large" => 2 * 1024 * 1024 + 13,
        other => panic!("unknown fixture {other}"),
    }
}

/// Deterministic bytes for a named test file.
pub fn fixture(name: &str) -> Vec<u8> {
    let size = fixture_size(name);
    (0..size).map(|i| ((i * 31 + size) % 251) as u8).collect()
}

/// Builds multipart/form-data request bodies.
pub struct FormBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl Default for FormBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FormBuilder {
    pub fn new() -> Self {
        Self::with_boundary(BOUNDARY)
    }

    pub fn with_boundary(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            body: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.open_part();
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.open_part();
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Attach fixture `fixture` as `<fixture>.dat` under field `name`.
    pub fn fixture(self, name: &str, fixture_name: &str) -> Self {
        let data = fixture(fixture_name);
        self.file(
            name,
            &format!("{fixture_name}.dat"),
            "application/octet-stream",
            &data,
        )
    }

    /// Append raw bytes as-is.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            format!("multipart/form-data; boundary={}", self.boundary),
        );
        headers
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Close the body with the final delimiter.
    pub fn finish(mut self) -> (HashMap<String, String>, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (self.headers(), self.body)
    }

    /// Body without the final delimiter, as sent by a client that disconnects.
    pub fn finish_truncated(self) -> (HashMap<String, String>, Vec<u8>) {
        (self.headers(), self.body)
    }

    fn open_part(&mut self) {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

pub fn submit(
    handler: &UploadHandler,
    form: FormBuilder,
) -> Result<UploadResult, ProcessingError> {
    let (headers, body) = form.finish();
    handler
        .process(&headers, body.as_slice())
        .map(|result| result.expect("multipart request"))
}

/// Memory storage that records removals and can be told to misbehave.
#[derive(Default)]
pub struct RecordingStorage {
    pub inner: MemoryStorage,
    pub stored: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub fail_remove: bool,
    pub fail_store_for: Option<String>,
    /// Extra store latency per field name, in milliseconds
    pub delays: HashMap<String, u64>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn stored(&self) -> Vec<String> {
        self.stored.lock().unwrap().clone()
    }
}

impl StorageEngine for RecordingStorage {
    fn store(&self, info: &FileInfo, stream: &mut dyn Read) -> Result<UploadedFile, StorageError> {
        if self.fail_store_for.as_deref() == Some(info.field_name.as_str()) {
            return Err(StorageError::new("STORE_TEST", "Store refused"));
        }
        let file = self.inner.store(info, stream)?;
        if let Some(delay) = self.delays.get(&info.field_name) {
            thread::sleep(Duration::from_millis(*delay));
        }
        self.stored.lock().unwrap().push(info.field_name.clone());
        Ok(file)
    }

    fn remove(&self, file: &UploadedFile) -> Result<(), StorageError> {
        self.removed.lock().unwrap().push(file.field_name.clone());
        if self.fail_remove {
            return Err(StorageError::new("TEST", "Test error"));
        }
        Ok(())
    }
}
