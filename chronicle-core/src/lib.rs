//! Incremental merge-and-validation engine for campaign chronicles.
//!
//! This crate provides:
//! - The six interlinked collections of a chronicle knowledge base
//!   (events, characters, locations, factions, rolls, laws)
//! - Alias resolution and durable, partitioned identifier allocation
//! - Per-field merge rules and per-entity mergers
//! - Roll outcome canonicalization and cross-reference validation
//! - An ingestion ledger that makes chapter merges idempotent
//! - The extraction-service boundary and the chapter ingestion pipeline
//!
//! # Quick Start
//!
//! ```ignore
//! use chronicle_core::{IngestConfig, Ingestor, Selection};
//! use chronicle_core::extract::ClaudeExtractor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::new("data").with_chapters_dir("chapters");
//!     let extractor = ClaudeExtractor::from_env()?;
//!
//!     let mut ingestor = Ingestor::open(config).await?.with_extractor(extractor);
//!     let report = ingestor.run(&Selection::Unmerged).await?;
//!     for chapter in &report.chapters {
//!         println!("{chapter}");
//!     }
//!     Ok(())
//! }
//! ```

// Lets `#[derive(Schema)]` name this crate by its external path from inside it.
extern crate self as chronicle_core;

pub mod alias;
pub mod chapters;
pub mod config;
pub mod diagnostics;
pub mod extract;
pub mod ids;
pub mod ingest;
pub mod ledger;
pub mod merge;
pub mod model;
pub mod persist;
pub mod places;
pub mod range;
pub mod schema;
pub mod testing;
pub mod validate;

pub use chronicle_macros::Schema;

// Primary public API
pub use alias::{AliasConflict, AliasDeclarations, AliasIndex};
pub use config::{Credentials, CredentialsError, IngestConfig};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use ids::{IdAllocator, IdSpace};
pub use ingest::{ChapterReport, ChapterStatus, IngestError, Ingestor, RunReport, Selection};
pub use ledger::IngestionLedger;
pub use merge::{merge_chapter, MergeContext, MergeOutcome, MergeSummary};
pub use model::{EntityKind, KnowledgeBase};
pub use validate::{validate, ValidationScope};
