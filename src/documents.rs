//! Persisted step output.
//!
//! The raw steps write their documents to
//! `{dir}/{pipeline}/{partition}.json`; the embed steps read them back.
//! Writing a partition again replaces the file.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::Document;

pub struct DocumentStore {
    dir: PathBuf,
}

impl DocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, pipeline: &str, partition: &str) -> PathBuf {
        self.dir.join(pipeline).join(format!("{}.json", partition))
    }

    pub fn exists(&self, pipeline: &str, partition: &str) -> bool {
        self.path_for(pipeline, partition).is_file()
    }

    /// Write `docs` for a partition, replacing any previous file.
    pub fn write(&self, pipeline: &str, partition: &str, docs: &[Document]) -> Result<PathBuf> {
        let path = self.path_for(pipeline, partition);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Sibling temp file, then rename into place.
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(docs)?;
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move documents into {}", path.display()))?;
        Ok(path)
    }

    /// Read the documents of a partition.
    ///
    /// Fails if the partition was never ingested.
    pub fn read(&self, pipeline: &str, partition: &str) -> Result<Vec<Document>> {
        let path = self.path_for(pipeline, partition);
        read_documents(&path).with_context(|| {
            format!(
                "No documents for {} partition {} (run `kbi ingest {}` first)",
                pipeline, partition, pipeline
            )
        })
    }
}

fn read_documents(path: &Path) -> Result<Vec<Document>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid document file {}", path.display()))
}
