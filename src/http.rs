// SPDX-License-Identifier: MIT

//! Request value handed to the upload engine by the surrounding server.

use crate::fields::FieldMap;
use crate::multipart::is_multipart;
use crate::upload::UploadedFiles;
use std::collections::HashMap;
use std::io::Read;

/// An inbound request whose body is still unread.
///
/// Header names are stored lowercased. After
/// [`UploadHandler::handle`](crate::upload::UploadHandler::handle) the decoded
/// form lands in `fields` and `files`; both stay `None` for requests that are
/// not multipart.
#[derive(Debug)]
pub struct Request<R> {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: R,
    pub fields: Option<FieldMap>,
    pub files: Option<UploadedFiles>,
}

impl<R: Read> Request<R> {
    pub fn new<M: Into<String>, P: Into<String>>(method: M, path: P, body: R) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            body,
            fields: None,
            files: None,
        }
    }

    pub fn with_header<K: AsRef<str>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers
            .insert(name.as_ref().to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type().is_some_and(is_multipart)
    }
}
