// SPDX-License-Identifier: MIT

mod common;

use common::{BOUNDARY, FormBuilder, RecordingStorage, init_logging};
use formdrop::error::{ErrorKind, MultipartError};
use formdrop::http::Request;
use formdrop::storage::MemoryStorage;
use formdrop::{UploadHandler, UploadSchema};
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

fn handler() -> UploadHandler {
    UploadHandler::new(MemoryStorage::new(), UploadSchema::Any)
}

fn headers(content_type: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), content_type.to_string());
    headers
}

#[test]
fn test_missing_end_boundary() {
    init_logging();
    let storage = Arc::new(RecordingStorage::new());
    let handler = UploadHandler::new(storage.clone(), UploadSchema::Any);
    let (headers, body) = FormBuilder::new()
        .field("name", "Multer")
        .fixture("tiny0", "tiny0")
        .finish_truncated();

    let err = handler.process(&headers, body.as_slice()).unwrap_err();
    assert!(err.is_transport_error());
    assert_eq!(err.to_string(), "Unexpected end of multipart data");
    assert!(matches!(
        err.kind,
        ErrorKind::Multipart(MultipartError::UnexpectedEnd)
    ));
    assert_eq!(storage.removed(), storage.stored());
}

#[test]
fn test_missing_boundary_parameter() {
    let err = handler()
        .process(&headers("multipart/form-data"), &b""[..])
        .unwrap_err();
    assert!(err.is_transport_error());
    assert_eq!(err.to_string(), "Multipart: Boundary not found");
}

#[test]
fn test_body_without_any_delimiter() {
    let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
    let err = handler()
        .process(&headers(&content_type), &b"just some bytes"[..])
        .unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::Multipart(MultipartError::UnexpectedEnd)
    ));
}

#[test]
fn test_part_without_disposition() {
    let form = FormBuilder::new().raw(
        format!("--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\nvalue\r\n").as_bytes(),
    );
    let (headers, body) = form.finish();
    let err = handler().process(&headers, body.as_slice()).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::Multipart(MultipartError::InvalidPartHeader(_))
    ));
}

#[test]
fn test_preamble_and_epilogue_are_ignored() {
    let mut body = b"This is the preamble.\r\n".to_vec();
    let (headers, form) = FormBuilder::new().field("a", "1").finish();
    body.extend_from_slice(&form);
    body.extend_from_slice(b"This is the epilogue.\r\n");

    let result = handler().process(&headers, body.as_slice()).unwrap().unwrap();
    assert_eq!(result.fields.get("a").and_then(|v| v.as_text()), Some("1"));
}

#[test]
fn test_connection_reset_mid_file() {
    struct Resetting {
        data: io::Cursor<Vec<u8>>,
    }

    impl Read for Resetting {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::from(io::ErrorKind::ConnectionReset)),
                n => Ok(n),
            }
        }
    }

    let storage = Arc::new(RecordingStorage::new());
    let handler = UploadHandler::new(storage.clone(), UploadSchema::Any);
    let (headers, body) = FormBuilder::new()
        .fixture("done", "tiny1")
        .fixture("cut", "medium")
        .finish_truncated();
    let reader = Resetting {
        data: io::Cursor::new(body[..body.len() / 2].to_vec()),
    };

    let err = handler.process(&headers, reader).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::Multipart(MultipartError::UnexpectedEnd)
    ));
    assert_eq!(storage.removed(), vec!["done"]);
}

#[test]
fn test_non_multipart_requests_pass_through() {
    let handler = handler();

    let mut request = Request::new("POST", "/upload", &b"{\"a\":1}"[..])
        .with_header("Content-Type", "application/json");
    handler.handle(&mut request).unwrap();
    assert!(request.fields.is_none());
    assert!(request.files.is_none());

    let mut request = Request::new("POST", "/upload", &b""[..]);
    handler.handle(&mut request).unwrap();
    assert!(request.fields.is_none());

    let headers = headers("text/plain");
    assert!(handler.process(&headers, &b"hello"[..]).unwrap().is_none());
}

#[test]
fn test_handle_attaches_results() {
    let form = FormBuilder::new()
        .field("name", "Multer")
        .fixture("doc", "small1");
    let content_type = form.content_type();
    let (_, body) = form.finish();

    let mut request =
        Request::new("POST", "/upload", body.as_slice()).with_header("Content-Type", content_type);
    handler().handle(&mut request).unwrap();

    let fields = request.fields.unwrap();
    assert_eq!(fields.get("name").and_then(|v| v.as_text()), Some("Multer"));
    assert_eq!(request.files.unwrap().len(), 1);
}
