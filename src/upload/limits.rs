// SPDX-License-Identifier: MIT

/// Resource limits enforced while a body is decoded. `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Limits {
    /// Max field name length in bytes
    pub field_name_size: Option<usize>,
    /// Max text field value size in bytes
    pub field_value_size: Option<u64>,
    /// Max number of non-file fields
    pub field_count: Option<usize>,
    /// Max bytes per file
    pub file_size: Option<u64>,
    /// Max number of file parts
    pub file_count: Option<usize>,
    /// Max number of parts (fields + files)
    pub part_count: Option<usize>,
    /// Max header lines per part
    pub header_pairs: Option<usize>,
}

impl Limits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(bytes);
        self
    }

    pub fn with_file_count(mut self, count: usize) -> Self {
        self.file_count = Some(count);
        self
    }

    pub fn with_part_count(mut self, count: usize) -> Self {
        self.part_count = Some(count);
        self
    }

    pub fn with_field_count(mut self, count: usize) -> Self {
        self.field_count = Some(count);
        self
    }

    pub fn with_field_value_size(mut self, bytes: u64) -> Self {
        self.field_value_size = Some(bytes);
        self
    }

    pub fn with_field_name_size(mut self, bytes: usize) -> Self {
        self.field_name_size = Some(bytes);
        self
    }
}

/// True when `count` is past an optional ceiling.
pub(crate) fn exceeds<T: PartialOrd>(limit: Option<T>, count: T) -> bool {
    limit.is_some_and(|max| count > max)
}
