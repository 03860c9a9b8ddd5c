//! Scraped items and the values they carry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A normalized field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Null => Ok(()),
        }
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

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

/// One normalized record for a detail page.
///
/// Fields are best-effort: an item may lack optional keys and may carry
/// required keys as [`FieldValue::Null`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item {
    fields: BTreeMap<String, FieldValue>,
}

impl Item {
    pub const URL: &'static str = "url";
    pub const PARENT_URL: &'static str = "parent_url";

    pub fn new(url: &str, parent_url: Option<&str>) -> Self {
        let mut item = Self::default();
        item.insert(Self::URL, url);
        if let Some(parent) = parent_url {
            item.insert(Self::PARENT_URL, parent);
        }
        item
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn url(&self) -> Option<&str> {
        self.get(Self::URL).and_then(FieldValue::as_text)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether any field other than the bookkeeping URLs holds a value.
    pub fn has_content(&self) -> bool {
        self.fields
            .iter()
            .any(|(k, v)| k != Self::URL && k != Self::PARENT_URL && !v.is_null())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_carries_urls_but_no_content() {
        let item = Item::new("https://example.com/b/1", Some("https://example.com/l"));
        assert_eq!(item.url(), Some("https://example.com/b/1"));
        assert!(item.contains(Item::PARENT_URL));
        assert!(!item.has_content());
    }

    #[test]
    fn null_fields_do_not_count_as_content() {
        let mut item = Item::new("https://example.com/b/1", None);
        item.insert("title", FieldValue::Null);
        assert!(!item.has_content());
        item.insert("price", 12.5);
        assert!(item.has_content());
    }

    #[test]
    fn serializes_as_flat_object() {
        let mut item = Item::new("https://example.com/b/1", None);
        item.insert("price", 9.95);
        item.insert("title", FieldValue::Null);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"price": 9.95, "title": null, "url": "https://example.com/b/1"})
        );
    }
}
