//! Summary: Record model shared by the engine and the store collaborators.
//! Copyright (c) YOAB. All rights reserved.
//!
//! An `Item` is an opaque bag of named attributes. The engine only ever
//! reads the two primary key attributes (`PK`, `SK`); everything else is
//! payload owned by the workload generators.

use std::collections::BTreeMap;
use std::fmt;

/// Attribute holding the partition key of every item.
pub const PARTITION_KEY: &str = "PK";

/// Attribute holding the sort key of every item.
pub const SORT_KEY: &str = "SK";

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// String attribute.
    S(String),
    /// Integral number attribute.
    N(i64),
    /// Nested document attribute.
    M(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Returns the string payload, if this is a string attribute.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric payload, if this is a number attribute.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            AttrValue::N(n) => Some(*n),
            _ => None,
        }
    }
}

/// Primary key of an item: partition key plus sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

/// A record stored in a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item {
    attrs: BTreeMap<String, AttrValue>,
}

impl Item {
    /// Creates an item with its primary key attributes set.
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self::default()
            .with_string(PARTITION_KEY, partition_key)
            .with_string(SORT_KEY, sort_key)
    }

    /// Sets a string attribute, replacing any previous value.
    pub fn with_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), AttrValue::S(value.into()));
        self
    }

    /// Sets a number attribute, replacing any previous value.
    pub fn with_number(mut self, name: impl Into<String>, value: i64) -> Self {
        self.attrs.insert(name.into(), AttrValue::N(value));
        self
    }

    /// Sets a nested document attribute, replacing any previous value.
    pub fn with_map(mut self, name: impl Into<String>, value: BTreeMap<String, AttrValue>) -> Self {
        self.attrs.insert(name.into(), AttrValue::M(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Returns a string attribute, or `None` if missing or not a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(AttrValue::as_str)
    }

    /// Returns a number attribute, or `None` if missing or not a number.
    pub fn get_number(&self, name: &str) -> Option<i64> {
        self.attrs.get(name).and_then(AttrValue::as_number)
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.get_str(PARTITION_KEY)
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.get_str(SORT_KEY)
    }

    /// Extracts the primary key, if both key attributes are strings.
    pub fn key(&self) -> Option<ItemKey> {
        Some(ItemKey::new(self.partition_key()?, self.sort_key()?))
    }

    /// Number of attributes on the item (keys included).
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_key_extraction() {
        let item = Item::new("O#1", "C#7").with_number("amount", 42);
        assert_eq!(item.key(), Some(ItemKey::new("O#1", "C#7")));
        assert_eq!(item.get_number("amount"), Some(42));
        assert_eq!(item.get_str("amount"), None);
        assert_eq!(item.len(), 3);
    }

    #[test]
    fn test_item_without_sort_key_has_no_key() {
        let item = Item::default().with_string(PARTITION_KEY, "P#1");
        assert!(item.key().is_none());
        assert_eq!(item.partition_key(), Some("P#1"));
    }

    #[test]
    fn test_with_string_replaces_value() {
        let item = Item::new("a", "b").with_string("GSI1PK", "x").with_string("GSI1PK", "y");
        assert_eq!(item.get_str("GSI1PK"), Some("y"));
    }
}
