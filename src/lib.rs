//! # Full-text pipeline
//!
//! Change-aware full-text extraction for bibliographic records.
//!
//! A link file maps each bibcode to the source document holding its full
//! text. The pipeline decides, record by record, whether that text has to be
//! extracted again, extracts it with a format-specific extractor and
//! publishes the result to a canonical on-disk store, never re-extracting a
//! source that has not changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌────────┐   ┌────────────┐   ┌──────────┐
//! │ link file │──▶│ detector │──▶│ router │──▶│ extractors │──▶│  writer  │
//! │ (payload) │   │ NEW/DIFF │   │ format │   │ Std │ PDF  │   │ obj/meta │
//! └───────────┘   └────┬─────┘   └───┬────┘   └─────┬──────┘   └────┬─────┘
//!                      └─────────────┴──────────────┴───────────────┴──▶ error sink
//! ```
//!
//! The only shared state is the store: the detector reads provenance from it
//! and the writer replaces bibcode directories in it atomically.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the inter-stage message |
//! | [`links`] | Link-file parsing and payload building |
//! | [`store`] | Bibcode partitioning, provenance lookup, audit |
//! | [`detect`] | Change detection |
//! | [`router`] | Format to extraction-queue routing |
//! | [`extract`] | Extractors and extraction pools |
//! | [`writer`] | Atomic publication |
//! | [`sink`] | Failure collection |
//! | [`lifecycle`] | Per-bibcode state machine |
//! | [`pipeline`] | Stage wiring and run summaries |

pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod links;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod show;
pub mod sink;
pub mod stats;
pub mod store;
pub mod writer;
