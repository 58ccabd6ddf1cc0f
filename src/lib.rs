//! # NeuroSCAN ingestion
//!
//! Loads a developmental-connectome dataset into SQLite. The dataset is a
//! directory tree of 3-D scene files and CSV tables; entity type,
//! developmental stage and timepoint are recovered from path segments, and
//! entity identifiers are decoded from scene node names.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  walker  │──▶│ typed queues │──▶│ worker pool  │──▶│  SQLite  │
//! │ classify │   │  (bounded)   │   │ scene/codec/ │   │ upsert   │
//! └──────────┘   └──────────────┘   │   tabular    │   └──────────┘
//!                                   └──────────────┘
//! ```
//!
//! Phases keep dependent records (contacts, synapses, cphate trees,
//! measurements) behind the neurons they reference.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Entity vocabulary and records |
//! | [`classify`] | Path classification |
//! | [`codec`] | Identifier grammars |
//! | [`scene`] | glTF / GLB scene parsing |
//! | [`tabular`] | CSV row decoding |
//! | [`walker`] | Directory walk and routing |
//! | [`pool`] | Typed queues and workers |
//! | [`processor`] | Path → record → store |
//! | [`repository`] | Per-entity upsert |
//! | [`report`] | Outcomes and the run report |
//! | [`ingest`] | Run orchestration |
//! | [`progress`] | Progress reporting |
//! | [`stats`] | Database statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod classify;
pub mod codec;
pub mod config;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod pool;
pub mod processor;
pub mod progress;
pub mod report;
pub mod repository;
pub mod scene;
pub mod stats;
pub mod tabular;
pub mod walker;
