//! # Phenotype Index
//!
//! Hybrid lexical + semantic retrieval over a catalog of phenotype cohort
//! definitions.
//!
//! An offline build pipeline turns raw catalog records (plus optional full
//! definition documents) into an immutable generation of on-disk artifacts:
//! a newline-delimited catalog, a BM25 inverted index, an L2-normalized
//! dense vector index, an embedding cache, and a manifest. An online query
//! engine loads one published generation read-only and serves hybrid
//! `search`, dense `list_similar`, and O(1) `fetch_summary` lookups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ metadata CSV │──▶│   reindex    │──▶│ generation dir  │
//! │ definitions/ │   │ catalog +    │   │ catalog, sparse │
//! └──────────────┘   │ sparse+dense │   │ dense, cache,   │
//!                    └──────────────┘   │ meta  (CURRENT) │
//!                                       └───────┬────────┘
//!                                               ▼
//!                                        ┌──────────────┐
//!                                        │    engine    │
//!                                        │ search /     │
//!                                        │ similar /    │
//!                                        │ summary      │
//!                                        └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Catalog rows, results, manifest types |
//! | [`text`] | Shared tokenizer and content hashing |
//! | [`catalog`] | Raw record → catalog row normalization |
//! | [`sparse`] | Inverted index + BM25 scoring |
//! | [`embedding`] | Embedding HTTP client and cache |
//! | [`dense`] | Vector index trait + flat inner-product backend |
//! | [`store`] | Artifact layout, generations, atomic publish |
//! | [`engine`] | Hybrid query engine |
//! | [`reindex`] | End-to-end build orchestration |
//! | [`query`] | CLI query command wrappers |

pub mod catalog;
pub mod config;
pub mod dense;
pub mod embedding;
pub mod engine;
pub mod models;
pub mod query;
pub mod reindex;
pub mod sparse;
pub mod store;
pub mod text;
