//! # kvtree
//!
//! An embedded, hierarchical key-value store persisted in a single `SQLite` file.
//!
//! Keys are slash-delimited paths. Every path names an [`Entry`] that is either a
//! value (a leaf holding an opaque string) or a container holding named children.
//! The tree is mapped onto one relational table; ancestors are materialized
//! eagerly and deletes cascade through the whole subtree.
//!
//! ## Features
//!
//! - Single-file storage, created and versioned on first open
//! - Transactional mutations serialized by a per-handle guard
//! - Breadth-first reads and traversal with a depth limit
//! - Bulk tree import with force and merge semantics
//! - Per-path pre/post set hooks, with optional asynchronous post hooks
//! - JSON export and import of whole subtrees
//!
//! ## Example
//!
//! ```rust,no_run
//! use kvtree::Store;
//!
//! let (store, _created) = Store::open("./settings.db")?;
//! store.set("network/eth0/address", "10.0.0.2")?;
//! assert_eq!(store.get("/network//eth0/address/")?, "10.0.0.2");
//!
//! let entry = store.get_entry_depth("network", 1)?;
//! assert!(entry.children.contains_key("eth0"));
//! # Ok::<(), kvtree::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod convert;
pub mod hooks;
pub mod io;
pub mod models;
pub mod observability;
pub mod path;
pub mod storage;
pub mod store;

pub use config::{LogFormat, LoggingSettings, StoreConfig};
pub use convert::Stringable;
pub use hooks::{HookDispatch, HookGate, HookRegistry, NoopHooks};
pub use models::Entry;
pub use store::Store;

/// Error type for kvtree operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `PathInvalid` | Root mutation, empty path, value/container conflict without force |
/// | `PathNotFound` | No entry exists at the queried path |
/// | `PathIsNotAValue` | A value-only operation hits a container |
/// | `SchemaMismatch` | The file's schema version differs from the supported one |
/// | `StorageFailure` | `SQLite` errors: open, query, constraint, I/O |
/// | `HookRejected` | A pre-set hook vetoed a write |
/// | `OperationFailed` | Process-level setup outside storage, such as installing the log subscriber |
/// | `InvalidInput` | Malformed JSON import, unreadable config, empty value where one is required |
/// | `Conversion` | A stored string cannot be parsed into the requested type |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The operation is structurally illegal for the given path.
    #[error("invalid path: '{0}'")]
    PathInvalid(String),

    /// No entry exists at the path.
    #[error("path not found: '{0}'")]
    PathNotFound(String),

    /// The entry at the path is a container, not a value.
    #[error("path is not a value: '{0}'")]
    PathIsNotAValue(String),

    /// The on-disk schema version is not the one this build supports.
    ///
    /// Older files must be brought forward with [`Store::migrate`]; newer
    /// files cannot be opened at all.
    #[error("schema version mismatch: found {found}, supported {supported}")]
    SchemaMismatch {
        /// Version stamped in the database file.
        found: u32,
        /// Version this build reads and writes.
        supported: u32,
    },

    /// The underlying storage engine failed.
    #[error("storage operation '{operation}' failed: {cause}")]
    StorageFailure {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A pre-set hook refused the write.
    #[error("pre-set hook rejected write to '{path}': {cause}")]
    HookRejected {
        /// Path of the rejected write.
        path: String,
        /// Error reported by the hook.
        cause: String,
    },

    /// A non-storage operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored value could not be converted to the requested type.
    #[error("cannot convert '{value}' to {target}")]
    Conversion {
        /// The stored string.
        value: String,
        /// Name of the requested type.
        target: &'static str,
    },
}

/// Coarse classification of [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::PathInvalid`].
    PathInvalid,
    /// See [`Error::PathNotFound`].
    PathNotFound,
    /// See [`Error::PathIsNotAValue`].
    PathIsNotAValue,
    /// See [`Error::SchemaMismatch`].
    SchemaMismatch,
    /// See [`Error::StorageFailure`].
    StorageFailure,
    /// See [`Error::HookRejected`].
    HookRejected,
    /// See [`Error::OperationFailed`].
    OperationFailed,
    /// See [`Error::InvalidInput`] and [`Error::Conversion`].
    InvalidInput,
}

impl ErrorKind {
    /// Distinct nonzero process exit status for this kind.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::InvalidInput => 2,
            Self::PathInvalid => 3,
            Self::PathNotFound => 4,
            Self::PathIsNotAValue => 5,
            Self::SchemaMismatch => 6,
            Self::HookRejected => 7,
            Self::StorageFailure => 8,
            Self::OperationFailed => 9,
        }
    }
}

impl Error {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PathInvalid(_) => ErrorKind::PathInvalid,
            Self::PathNotFound(_) => ErrorKind::PathNotFound,
            Self::PathIsNotAValue(_) => ErrorKind::PathIsNotAValue,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::StorageFailure { .. } => ErrorKind::StorageFailure,
            Self::HookRejected { .. } => ErrorKind::HookRejected,
            Self::OperationFailed { .. } => ErrorKind::OperationFailed,
            Self::InvalidInput(_) | Self::Conversion { .. } => ErrorKind::InvalidInput,
        }
    }

    /// Wraps a storage engine error with the name of the failing operation.
    pub(crate) fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::StorageFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for kvtree operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PathNotFound("a/b".to_string());
        assert_eq!(err.to_string(), "path not found: 'a/b'");

        let err = Error::SchemaMismatch {
            found: 0,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "schema version mismatch: found 0, supported 1"
        );

        let err = Error::storage("insert_entry", "disk I/O error");
        assert_eq!(
            err.to_string(),
            "storage operation 'insert_entry' failed: disk I/O error"
        );
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::PathInvalid,
            ErrorKind::PathNotFound,
            ErrorKind::PathIsNotAValue,
            ErrorKind::SchemaMismatch,
            ErrorKind::StorageFailure,
            ErrorKind::HookRejected,
            ErrorKind::OperationFailed,
            ErrorKind::InvalidInput,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_conversion_maps_to_invalid_input() {
        let err = Error::Conversion {
            value: "abc".to_string(),
            target: "u32",
        };
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
