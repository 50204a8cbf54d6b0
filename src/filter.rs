// SPDX-License-Identifier: MIT

//! Per-file acceptance checks run before a file reaches storage.

use crate::error::BoxError;
use crate::storage::FileInfo;
use glob::Pattern;
use std::path::Path;

/// Decides whether a file part is stored.
///
/// `Ok(true)` stores the file, `Ok(false)` skips it silently and `Err` aborts
/// the whole request with that error.
pub trait FileFilter: Send + Sync {
    fn accept(&self, info: &FileInfo) -> Result<bool, BoxError>;
}

impl<F> FileFilter for F
where
    F: Fn(&FileInfo) -> Result<bool, BoxError> + Send + Sync,
{
    fn accept(&self, info: &FileInfo) -> Result<bool, BoxError> {
        self(info)
    }
}

/// Accepts files whose original name matches one of a set of glob patterns,
/// e.g. `*.zip` or `*.txt`.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    patterns: Vec<Pattern>,
}

impl ExtensionFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self, glob::PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| pattern.as_ref().trim().to_string())
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| Pattern::new(&pattern))
            .collect::<Result<Vec<Pattern>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }
}

impl FileFilter for ExtensionFilter {
    fn accept(&self, info: &FileInfo) -> Result<bool, BoxError> {
        if self.patterns.is_empty() {
            return Ok(true); // No restrictions
        }

        let path = Path::new(&info.original_name);
        Ok(self
            .patterns
            .iter()
            .any(|pattern| pattern.matches_path(path)))
    }
}
