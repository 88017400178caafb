//! Data models for kvtree.
//!
//! The in-memory projection of stored trees. Nothing here touches storage.

mod entry;

pub use entry::Entry;
