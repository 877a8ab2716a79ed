//! Vector record identifiers.
//!
//! | Policy | Id | Stable across runs |
//! |--------|----|--------------------|
//! | [`IdPolicy::Sequential`] | zero-based position in the batch | no |
//! | [`IdPolicy::SourceHash`] | hex MD5 of `metadata.source` | yes |
//! | [`IdPolicy::StableKey`] | hex SHA-256 of `metadata.type` + `metadata.source`, 32 chars | yes |
//!
//! Sequential ids overwrite unrelated vectors whenever two runs write the
//! same positions into one namespace, and leave stale vectors behind when a
//! later run is shorter. Prefer a hashing policy when re-ingesting.

use anyhow::{anyhow, Result};
use md5::Md5;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::models::Document;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicy {
    Sequential,
    SourceHash,
    StableKey,
}

impl IdPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPolicy::Sequential => "sequential",
            IdPolicy::SourceHash => "source_hash",
            IdPolicy::StableKey => "stable_key",
        }
    }
}

/// Assign one id per document, position-aligned with `docs`.
///
/// # Errors
///
/// The hashing policies fail when a document has no string `source`.
pub fn assign_ids(policy: IdPolicy, docs: &[Document]) -> Result<Vec<String>> {
    match policy {
        IdPolicy::Sequential => Ok((0..docs.len()).map(|i| i.to_string()).collect()),
        IdPolicy::SourceHash => docs
            .iter()
            .enumerate()
            .map(|(i, doc)| required_source(i, doc).map(source_hash_id))
            .collect(),
        IdPolicy::StableKey => docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let source = required_source(i, doc)?;
                let kind = doc
                    .metadata
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                Ok(stable_key_id(kind, source))
            })
            .collect(),
    }
}

/// `hex(MD5(url))`.
pub fn source_hash_id(url: &str) -> String {
    hex::encode(Md5::digest(url.as_bytes()))
}

/// First 32 hex chars of `SHA-256(kind || 0x00 || source)`.
pub fn stable_key_id(kind: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
}

fn required_source(index: usize, doc: &Document) -> Result<&str> {
    doc.source()
        .ok_or_else(|| anyhow!("document {} has no string 'source' metadata", index))
}
