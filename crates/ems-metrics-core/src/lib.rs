//! # EMS Metrics Core
//!
//! Storage-agnostic logic for the EMS reporting backend: the document
//! store abstraction and query model, per-category normalizers, the
//! category registry, the filter/join coordinator, temporal metrics,
//! keyword classification, and derived analytics.
//!
//! This crate does no file or network I/O of its own. Concrete stores,
//! external feeds, caching, and the HTTP surface live in the `ems-metrics`
//! application crate.

pub mod analytics;
pub mod classify;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod flatten;
pub mod models;
pub mod normalize;
pub mod registry;
pub mod stats;
pub mod store;
pub mod temporal;
