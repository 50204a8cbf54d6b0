// SPDX-License-Identifier: MIT

//! Part header decoding.
//!
//! Turns the raw header block of one multipart part into [`PartHeaders`]:
//! the `Content-Disposition` field name and optional filename, the
//! `Content-Type`, and the `Content-Transfer-Encoding`. Filenames are kept
//! exactly as the client sent them; sanitizing them is left to the storage
//! backend that turns them into paths.

use super::MultipartConfig;
use crate::error::MultipartError;
use crate::utils::{decode_charset, percent_decode};
use std::collections::HashMap;

/// MIME type reported for file parts without a `Content-Type`.
pub const DEFAULT_FILE_MIME: &str = "application/octet-stream";
/// MIME type reported for text fields without a `Content-Type`.
pub const DEFAULT_FIELD_MIME: &str = "text/plain";
const DEFAULT_TRANSFER_ENCODING: &str = "7bit";

/// Represents the Content-Disposition header of a multipart part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// The disposition type (usually "form-data")
    pub disposition_type: String,
    /// The name of the form field
    pub name: String,
    /// Filename for file uploads, verbatim
    pub filename: Option<String>,
    /// Additional parameters from the Content-Disposition header
    pub parameters: HashMap<String, String>,
}

/// Represents the headers of a multipart part
#[derive(Debug, Clone)]
pub struct PartHeaders {
    pub disposition: ContentDisposition,
    pub content_type: Option<String>,
    pub transfer_encoding: Option<String>,
    /// All raw headers, names lowercased
    pub headers: HashMap<String, String>,
}

impl PartHeaders {
    /// Parse a part's header block (without the terminating blank line).
    pub fn parse(block: &[u8], config: &MultipartConfig) -> Result<Self, MultipartError> {
        if block.len() > config.max_headers_size {
            return Err(MultipartError::invalid_header(format!(
                "Part headers too large: {} bytes",
                block.len()
            )));
        }

        let text = String::from_utf8_lossy(block);
        let mut lines: Vec<String> = Vec::new();

        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            // Folded header: continuation of the previous line
            if line.starts_with(' ') || line.starts_with('\t') {
                match lines.last_mut() {
                    Some(previous) => {
                        previous.push(' ');
                        previous.push_str(line.trim());
                    }
                    None => {
                        return Err(MultipartError::invalid_header(format!(
                            "Continuation line without header: {line}"
                        )));
                    }
                }
                continue;
            }
            lines.push(line.to_string());
        }

        if let Some(max_pairs) = config.max_header_pairs {
            if lines.len() > max_pairs {
                return Err(MultipartError::invalid_header(format!(
                    "Too many header lines: {} (maximum {max_pairs})",
                    lines.len()
                )));
            }
        }

        let mut headers = HashMap::new();
        let mut disposition = None;
        let mut content_type = None;
        let mut transfer_encoding = None;

        for line in &lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(MultipartError::invalid_header(format!(
                    "Invalid header format: {line}"
                )));
            };
            let name = name.trim().to_lowercase();
            let value = value.trim().to_string();

            match name.as_str() {
                "content-disposition" => {
                    disposition = Some(Self::parse_content_disposition(&value)?);
                }
                "content-type" => content_type = Some(value.clone()),
                "content-transfer-encoding" => transfer_encoding = Some(value.clone()),
                _ => {}
            }

            headers.insert(name, value);
        }

        let disposition = disposition.ok_or_else(|| {
            MultipartError::invalid_header("Missing Content-Disposition header")
        })?;

        Ok(Self {
            disposition,
            content_type,
            transfer_encoding,
            headers,
        })
    }

    /// Parse the Content-Disposition header value.
    ///
    /// Parameter values may be tokens or quoted strings. RFC 5987 extended
    /// parameters (`name*`, `filename*`) win over their plain counterparts.
    pub fn parse_content_disposition(value: &str) -> Result<ContentDisposition, MultipartError> {
        let segments = split_unquoted(value, ';');
        let mut segments = segments.into_iter();

        let disposition_type = segments
            .next()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MultipartError::invalid_header("Empty Content-Disposition header"))?;

        let mut name = None;
        let mut extended_name = None;
        let mut filename = None;
        let mut extended_filename = None;
        let mut parameters = HashMap::new();

        for segment in segments {
            let Some((key, raw)) = segment.split_once('=') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let raw = raw.trim();

            match key.as_str() {
                "name" => name = Some(unquote(raw)),
                "name*" => extended_name = decode_extended(raw),
                "filename" => filename = Some(unquote(raw)),
                "filename*" => extended_filename = decode_extended(raw),
                _ => {
                    parameters.insert(key, unquote(raw));
                }
            }
        }

        let name = extended_name.or(name).ok_or_else(|| {
            MultipartError::invalid_header("Missing 'name' in Content-Disposition")
        })?;

        Ok(ContentDisposition {
            disposition_type,
            name,
            filename: extended_filename.or(filename),
            parameters,
        })
    }

    pub fn field_name(&self) -> &str {
        &self.disposition.name
    }

    pub fn filename(&self) -> Option<&str> {
        self.disposition.filename.as_deref()
    }

    /// Check if this part is a file upload
    pub fn is_file(&self) -> bool {
        self.disposition.filename.is_some()
    }

    /// Lowercased `type/subtype` without parameters, defaulted by part kind.
    pub fn mime_type(&self) -> String {
        let declared = self
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_lowercase())
            .unwrap_or_default();

        if !declared.is_empty() {
            declared
        } else if self.is_file() {
            DEFAULT_FILE_MIME.to_string()
        } else {
            DEFAULT_FIELD_MIME.to_string()
        }
    }

    /// `charset` parameter of the part's Content-Type, if declared.
    pub fn charset(&self) -> Option<String> {
        let content_type = self.content_type.as_deref()?;
        split_unquoted(content_type, ';')
            .into_iter()
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, value)| unquote(value.trim()).to_lowercase())
    }

    pub fn encoding(&self) -> String {
        self.transfer_encoding
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_TRANSFER_ENCODING.to_string())
    }
}

/// Split on `separator` outside of double-quoted sections.
fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                segments.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&input[start..]);
    segments
}

/// Strip surrounding quotes and resolve backslash escapes of a quoted-string.
fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };

    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                value.push(next);
                continue;
            }
        }
        value.push(c);
    }
    value
}

/// Decode an RFC 5987 `charset'language'pct-encoded` value.
fn decode_extended(raw: &str) -> Option<String> {
    let raw = unquote(raw);
    let mut pieces = raw.splitn(3, '\'');
    let charset = pieces.next()?;
    let _language = pieces.next()?;
    let encoded = pieces.next()?;
    Some(decode_charset(&percent_decode(encoded), charset))
}
