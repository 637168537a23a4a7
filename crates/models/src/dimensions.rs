use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DimensionValue is the value side of a capability dimension.
/// A task request uses Multi to accept any one of several values.
/// A bot uses Multi to offer all of several values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionValue {
    Single(String),
    Multi(Vec<String>),
}

impl DimensionValue {
    /// Values of this dimension, in declaration order.
    pub fn values(&self) -> &[String] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multi(values) => values,
        }
    }
}

impl From<&str> for DimensionValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for DimensionValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for DimensionValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<&str>> for DimensionValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Multi(values.into_iter().map(String::from).collect())
    }
}

/// Dimensions is a mapping from dimension label to value(s), ordered on
/// label. Requests use it to declare what they require, and bots use it
/// to declare what they provide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimensions(BTreeMap<String, DimensionValue>);

impl Dimensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<DimensionValue>) {
        self.0.insert(label.into(), value.into());
    }

    pub fn get(&self, label: &str) -> Option<&DimensionValue> {
        self.0.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DimensionValue)> {
        self.0.iter().map(|(label, value)| (label.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical JSON rendering of this mapping: labels sorted, no
    /// whitespace, and a single-element Multi collapsed to its Single
    /// equivalent. Two mappings with equal canonical renderings are the
    /// same dimension set for fingerprinting purposes.
    pub fn canonical_json(&self) -> String {
        let mut map = serde_json::Map::new();
        for (label, value) in &self.0 {
            let value = match value {
                DimensionValue::Multi(values) if values.len() == 1 => {
                    serde_json::Value::String(values[0].clone())
                }
                other => serde_json::to_value(other).expect("dimension values always serialize"),
            };
            map.insert(label.clone(), value);
        }
        serde_json::Value::Object(map).to_string()
    }
}

impl<L, V> FromIterator<(L, V)> for Dimensions
where
    L: Into<String>,
    V: Into<DimensionValue>,
{
    fn from_iter<T: IntoIterator<Item = (L, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(label, value)| (label.into(), value.into()))
                .collect(),
        )
    }
}
