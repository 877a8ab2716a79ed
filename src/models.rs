//! Core data models that flow through the ingestion pipeline.
//!
//! A [`Document`] is produced by a fetcher, persisted by the document
//! store, and turned into [`VectorRecord`]s by the embed step. Only
//! sanitized [`Metadata`] ever reaches a vector store.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Raw document metadata. Keeps insertion order and may hold any JSON value.
pub type RawMetadata = serde_json::Map<String, serde_json::Value>;

/// A normalized source document: the text to embed plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    #[serde(default)]
    pub metadata: RawMetadata,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: RawMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// The `source` metadata entry (page or issue URL), when it is a string.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// A primitive metadata value accepted by vector stores.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl MetadataValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetadataValue::String(s) => serde_json::Value::String(s.clone()),
            MetadataValue::Integer(i) => serde_json::Value::from(*i),
            MetadataValue::Float(f) => serde_json::Value::from(*f),
            MetadataValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetadataValue::String(s) => serializer.serialize_str(s),
            MetadataValue::Integer(i) => serializer.serialize_i64(*i),
            MetadataValue::Float(f) => serializer.serialize_f64(*f),
            MetadataValue::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

/// Sanitized metadata: primitive values only, in source key order.
///
/// Built by [`crate::sanitize::sanitize_metadata`]. Serializes as a JSON
/// object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert back to an ordered JSON object.
    pub fn to_json(&self) -> RawMetadata {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// The unit written to a vector store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    #[serde(rename = "values")]
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// A match returned by a vector store query.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: RawMetadata,
}

/// Result metadata of a pipeline step, the counterpart of an asset
/// materialization.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    pub metadata: RawMetadata,
}

impl StepReport {
    pub fn new(step: impl Into<String>, partition: Option<String>) -> Self {
        Self {
            step: step.into(),
            partition,
            metadata: RawMetadata::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}
