// SPDX-License-Identifier: MIT

//! Text field accumulation
//!
//! Repeated names promote to lists and bracketed names such as
//! `user[address][city]` expand into nested maps.

use std::collections::HashMap;

/// Value collected for a text field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<FieldValue>),
    Map(FieldMap),
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Text(String::new())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            FieldValue::Map(map) => Some(map),
            _ => None,
        }
    }

    fn into_map(self) -> FieldMap {
        match self {
            FieldValue::Map(map) => map,
            FieldValue::Text(text) => {
                let mut map = FieldMap::new();
                map.insert("", FieldValue::Text(text));
                map
            }
            FieldValue::List(items) => {
                let mut map = FieldMap::new();
                for (index, item) in items.into_iter().enumerate() {
                    map.insert(index.to_string(), item);
                }
                map
            }
        }
    }

    fn into_list(self) -> Vec<FieldValue> {
        match self {
            FieldValue::List(items) => items,
            other => vec![other],
        }
    }
}

/// Insertion-ordered map of field names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
    /// Position of each key in `entries`
    index: HashMap<String, usize>,
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Key(String),
    Push,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.position(key).map(|index| &self.entries[index].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Set `key` to `value`, replacing any previous value in place.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: FieldValue) {
        let key = key.into();
        match self.position(&key) {
            Some(index) => self.entries[index].1 = value,
            None => {
                self.push_entry(key, value);
            }
        }
    }

    /// Record one submitted value for `name`, expanding bracket paths.
    pub fn append(&mut self, name: &str, value: String) {
        match parse_path(name) {
            Some((root, path)) => insert_path(self, root, &path, value),
            None => self.append_flat(name, value),
        }
    }

    /// Record a value under a literal key: scalar first, list on repeat.
    pub fn append_flat(&mut self, key: &str, value: String) {
        let Some(index) = self.position(key) else {
            self.push_entry(key.to_string(), FieldValue::Text(value));
            return;
        };

        let slot = &mut self.entries[index].1;
        match slot {
            FieldValue::List(items) => items.push(FieldValue::Text(value)),
            FieldValue::Map(map) => map.append_flat("", value),
            FieldValue::Text(_) => {
                let previous = std::mem::take(slot);
                *slot = FieldValue::List(vec![previous, FieldValue::Text(value)]);
            }
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn push_entry(&mut self, key: String, value: FieldValue) -> usize {
        let index = self.entries.len();
        self.index.insert(key.clone(), index);
        self.entries.push((key, value));
        index
    }

    fn slot_or_insert(&mut self, key: &str, empty: FieldValue) -> &mut FieldValue {
        let index = match self.position(key) {
            Some(index) => index,
            None => self.push_entry(key.to_string(), empty),
        };
        &mut self.entries[index].1
    }
}

fn insert_path(map: &mut FieldMap, key: &str, path: &[Segment], value: String) {
    let Some((segment, rest)) = path.split_first() else {
        map.append_flat(key, value);
        return;
    };

    match segment {
        Segment::Key(child_key) => {
            let slot = map.slot_or_insert(key, FieldValue::Map(FieldMap::new()));
            let mut child = std::mem::take(slot).into_map();
            insert_path(&mut child, child_key, rest, value);
            *slot = FieldValue::Map(child);
        }
        Segment::Push => {
            let slot = map.slot_or_insert(key, FieldValue::List(Vec::new()));
            let mut items = std::mem::take(slot).into_list();
            if rest.is_empty() {
                items.push(FieldValue::Text(value));
            } else {
                let mut child = FieldMap::new();
                if let Some(Segment::Key(child_key)) = rest.first() {
                    insert_path(&mut child, child_key, &rest[1..], value);
                }
                items.push(FieldValue::Map(child));
            }
            *slot = FieldValue::List(items);
        }
    }
}

/// Split `a[b][]` into its root and bracket segments; `None` for flat names.
fn parse_path(name: &str) -> Option<(&str, Vec<Segment>)> {
    let open = name.find('[')?;
    if open == 0 {
        return None;
    }

    let (root, mut rest) = name.split_at(open);
    let mut segments = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        let key = &inner[..close];
        segments.push(if key.is_empty() {
            Segment::Push
        } else {
            Segment::Key(key.to_string())
        });
        rest = &inner[close + 1..];
    }

    Some((root, segments))
}
