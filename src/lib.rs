//! # Knowledge Ingest
//!
//! Weekly ingestion of GitHub issues, GitHub discussions and documentation
//! pages into a namespaced vector index, for retrieval-augmented answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Fetchers   │──▶│ Documents  │──▶│ Batch embed  │──▶│ Vector store │
//! │ GitHub/Docs  │   │   (JSON)   │   │ ids+metadata │   │ sqlite/pc/mem│
//! └──────────────┘   └────────────┘   └──────────────┘   └──────────────┘
//!        raw step                         embed step
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbi init                              # create the local vector store
//! kbi partitions                        # list weekly windows
//! kbi run github-issues                 # fetch + embed the latest week
//! kbi run docs                          # scrape + embed the docs
//! kbi search "how do I partition assets"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Documents, metadata, records, step reports |
//! | [`partitions`] | Weekly time windows |
//! | [`github`] | GitHub issues/discussions fetch and normalization |
//! | [`sitemap`] | Sitemap parsing and page scraping |
//! | [`documents`] | Persisted raw-step output |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`batch`] | Batch embedding |
//! | [`pacing`] | Pacing between embedding calls |
//! | [`ids`] | Vector id policies |
//! | [`sanitize`] | Metadata sanitization |
//! | [`store`] | Vector store abstraction and backends |
//! | [`pipeline`] | Raw and embed steps |
//! | [`search`] | Semantic search |
//! | [`stats`] | Vector counts per namespace |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | SQLite schema |

pub mod batch;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod github;
pub mod ids;
pub mod migrate;
pub mod models;
pub mod pacing;
pub mod partitions;
pub mod pipeline;
pub mod sanitize;
pub mod search;
pub mod sitemap;
pub mod stats;
pub mod store;
