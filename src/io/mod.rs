//! Import and export of entry trees.

pub mod json;

pub use json::{JsonEntry, entry_to_json, parse_entries, parse_values, values_to_json};
