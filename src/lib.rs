//! # Content Freshness
//!
//! Tracks how fresh externally-sourced content is, decides when it has
//! drifted enough to be regenerated, re-derives and archives new versions,
//! and supports rollback to earlier versions.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Tracker  │──▶│  Queue   │──▶│    Batch     │──▶│ Regenerator  │
//! │  scoring  │   │ pending… │   │  join_all    │   │ fetch+detect │
//! └─────┬─────┘   └──────────┘   └──────────────┘   └──────┬───────┘
//!       │                                                  │
//!       ▼                                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Store (SQLite / in-memory): records, versions         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fresh init                                  # create database
//! fresh track post-1 https://example.com/a    # start tracking
//! fresh check                                 # score and schedule
//! fresh queue process                         # regenerate queued items
//! fresh versions post-1
//! fresh rollback post-1 2
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`snapshot`] | Dynamic snapshots, equality and hashing |
//! | [`scoring`] | Staleness scoring |
//! | [`detection`] | Weighted change detection |
//! | [`tracker`] | Freshness records |
//! | [`queue`] | Refresh work queue |
//! | [`regenerate`] | Single-item regeneration |
//! | [`batch`] | Bounded-concurrency batch operations |
//! | [`versions`] | Version snapshots, history and rollback |
//! | [`fetcher`] | Metadata fetchers and content derivers |
//! | [`store`] | Storage backends |
//! | [`engine`] | Facade wiring everything together |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod batch;
pub mod config;
pub mod db;
pub mod detection;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod queue;
pub mod regenerate;
pub mod scoring;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod versions;
