//! Chainable, filter-building query readers over workflow state.
//!
//! Both readers are immutable builder chains: every filter/fetch-option
//! method returns a new, independent value so callers can branch a base
//! reader into several specialised ones without worrying about shared
//! mutable state. Terminal operations (`all`, `one`, `count`, `exists`, …)
//! take the builder by value.

pub mod data_reader;
pub mod node_reader;

pub use data_reader::DataReader;
pub use node_reader::NodeReader;
