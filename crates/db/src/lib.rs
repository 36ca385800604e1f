//! `db` crate — pure persistence layer for the dataflow workflow engine.
//!
//! Provides a connection pool, the shared row/domain types (`models`),
//! low-level repository functions (`repository`) for every table, and the
//! chainable, filter-building readers (`readers`) used by everything above
//! this crate. No business logic (command validation, routing, scheduling)
//! lives here — see the `ops` and `engine` crates for that.

pub mod error;
pub mod models;
pub mod pool;
pub mod readers;
pub mod repository;

pub use error::DbError;
pub use pool::DbPool;
