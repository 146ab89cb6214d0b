//! # Schema Sync Engine
//!
//! Read-only drift detection between a SQL Server database and a local
//! folder of `.sql` project files. Five long-lived workers observe a
//! process-wide state layer; a debouncer/processor pipeline coalesces raw
//! events into comparison triggers; a serialized orchestrator builds
//! snapshots, runs the comparer, and persists results.
//!
//! ## Module Organization
//!
//! - [`model`]: the data model shared by every other module.
//! - [`config`]: typed, validated configuration.
//! - [`normalizer`]: SQL canonicalization for hashing.
//! - [`repository`]: the four persistence collections, behind a narrow contract.
//! - [`db_source`]: the injected `SchemaSource` collaborator and its production TDS implementation.
//! - [`db_builder`]: `DatabaseModelBuilder`.
//! - [`file_builder`]: `FileModelBuilder`.
//! - [`comparer`]: `SchemaComparer`.
//! - [`orchestrator`]: the serialized comparison executor.
//! - [`debouncer`]: per-subscription event coalescing.
//! - [`processor`]: the debounced-batch consumer.
//! - [`realtime`]: the fan-out event publisher.
//! - [`workers`]: the five background workers.
//! - [`engine`]: top-level wiring and lifecycle.

pub mod model;
pub mod config;
pub mod normalizer;
pub mod repository;
pub mod db_source;
pub mod db_builder;
pub mod file_builder;
pub mod comparer;
pub mod orchestrator;
pub mod debouncer;
pub mod processor;
pub mod realtime;
pub mod workers;
pub mod engine;

pub use model::*;
pub use config::Configuration;
pub use engine::SyncEngine;
