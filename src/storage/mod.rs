//! Storage layer: the relational mapping of the entry tree.
//!
//! - [`schema`]: schema version state machine and migrations
//! - [`entries`]: the entry store operations, run inside a caller's transaction
//! - [`traverse`]: breadth-first walks over stored subtrees
//! - [`sqlite`]: shared connection handling and metrics

#![allow(clippy::significant_drop_tightening)]

pub mod entries;
pub mod schema;
pub mod sqlite;
pub mod traverse;

pub use entries::MergeStats;
pub use schema::{Migration, SCHEMA_VERSION, SchemaState};
pub use traverse::recurse;
