// SPDX-License-Identifier: MIT

//! Which file fields a handler accepts, and how many files each may carry.

use std::collections::HashMap;

/// One named file field and its optional file ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub max_count: Option<usize>,
}

impl FieldSpec {
    pub fn new<S: Into<String>>(name: S, max_count: Option<usize>) -> Self {
        Self {
            name: name.into(),
            max_count,
        }
    }
}

/// Declared shape of the accepted file fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSchema {
    /// One file under `name`
    Single(String),
    /// Files under one name, optionally capped
    Array {
        name: String,
        max_count: Option<usize>,
    },
    /// Several named fields, each with its own cap
    Fields(Vec<FieldSpec>),
    /// Files under any name
    Any,
    /// Text fields only; every file part is unexpected
    None,
}

impl UploadSchema {
    pub fn single<S: Into<String>>(name: S) -> Self {
        UploadSchema::Single(name.into())
    }

    pub fn array<S: Into<String>>(name: S, max_count: Option<usize>) -> Self {
        UploadSchema::Array {
            name: name.into(),
            max_count,
        }
    }

    pub fn fields<I: IntoIterator<Item = FieldSpec>>(specs: I) -> Self {
        UploadSchema::Fields(specs.into_iter().collect())
    }

    /// Whether `field` is declared at all, and its per-field ceiling.
    fn lookup(&self, field: &str) -> Option<Option<usize>> {
        match self {
            UploadSchema::Single(name) => (name == field).then_some(Some(1)),
            UploadSchema::Array { name, max_count } => (name == field).then_some(*max_count),
            UploadSchema::Fields(specs) => specs
                .iter()
                .find(|spec| spec.name == field)
                .map(|spec| spec.max_count),
            UploadSchema::Any => Some(None),
            UploadSchema::None => None,
        }
    }
}

/// Per-request slot accounting against an [`UploadSchema`].
#[derive(Debug, Default)]
pub struct SlotCounter {
    used: HashMap<String, usize>,
}

impl SlotCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one slot for `field`. Returns false when the field is not declared
    /// or its ceiling is already reached.
    pub fn claim(&mut self, schema: &UploadSchema, field: &str) -> bool {
        let Some(max_count) = schema.lookup(field) else {
            return false;
        };

        let used = self.used.entry(field.to_string()).or_insert(0);
        if max_count.is_some_and(|max| *used >= max) {
            return false;
        }
        *used += 1;
        true
    }
}
