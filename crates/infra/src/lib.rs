//! Persistence adapters for the bulk screening engine.
//!
//! Currently a single adapter: a Postgres-backed [`JobStore`] built on a
//! SQLx connection pool, plus the schema bootstrap it needs.
//!
//! [`JobStore`]: bulkscreen_engine::JobStore

pub mod postgres;

pub use postgres::PostgresJobStore;
