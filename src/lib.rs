//! # EMS Metrics
//!
//! Reporting backend for emergency medical services operations data.
//!
//! Raw mission protocols, dispatch-centre exports, a partner transport
//! API, and a public-holiday feed are normalized into fixed-schema tables
//! per category, restricted by year range or protocol ids, cached, and
//! turned into derived metrics (status-flow durations, weekday/holiday
//! cross tabulations, special-rights drives, vehicle workload).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ SQLite docs  │──▶│ Normalizers  │──▶│ Coordinator │──▶ cache ──▶ CLI / HTTP
//! │ partner API  │   │ (registry)   │   │ year → ids  │
//! │ holiday feed │   └──────────────┘   └─────────────┘
//! └──────────────┘
//! ```
//!
//! Storage-agnostic logic lives in `ems-metrics-core`; this crate adds the
//! SQLite store, external feeds, the cache, and the CLI/HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `DocumentStore` |
//! | [`import`] | JSON / JSON Lines import |
//! | [`partner_api`] | Partner transport API categories |
//! | [`holidays`] | Public-holiday feed category |
//! | [`cache`] | TTL result cache |
//! | [`loader`] | Registry wiring and cached loading |
//! | [`report`] | CLI report commands |
//! | [`server`] | HTTP API |

pub mod cache;
pub mod config;
pub mod db;
pub mod holidays;
pub mod import;
pub mod loader;
pub mod migrate;
pub mod partner_api;
pub mod report;
pub mod server;
pub mod sqlite_store;
