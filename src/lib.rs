// SPDX-License-Identifier: MIT

//! # formdrop
//!
//! A streaming `multipart/form-data` upload engine.
//!
//! The request body is tokenized incrementally, text fields are collected
//! into an ordered [`FieldMap`](fields::FieldMap), and accepted files are
//! streamed to a pluggable [`StorageEngine`](storage::StorageEngine) while
//! decoding continues. Resource limits are enforced during decoding, file
//! fields are arbitrated against an [`UploadSchema`](upload::UploadSchema),
//! and an aborted request removes every file it already stored.
//!
//! Start with [`UploadHandler`](upload::UploadHandler), or build one from
//! INI/environment settings through [`Config`](config::Config).

pub mod config;
mod dispatch;
pub mod error;
pub mod fields;
pub mod filter;
pub mod http;
pub mod multipart;
pub mod storage;
pub mod upload;
pub mod utils;

pub use error::{ErrorKind, LimitCode, ProcessingError};
pub use upload::{Limits, UploadHandler, UploadResult, UploadSchema, UploadedFiles};
