//! Pre/post set notification points.
//!
//! The store calls into a [`HookDispatch`] around every value write: once
//! before the row is written, where the dispatcher may veto the write, and
//! once after the row is staged in the transaction. [`HookRegistry`] is the
//! stock dispatcher with per-path callbacks; any other type can implement
//! [`HookDispatch`] directly.
//!
//! ```rust
//! use kvtree::{HookDispatch, Store};
//! use std::sync::Arc;
//!
//! struct ReadOnlyNetwork;
//!
//! impl HookDispatch for ReadOnlyNetwork {
//!     fn pre_set(&self, path: &str, _value: &str) -> anyhow::Result<()> {
//!         if path.starts_with("network/") {
//!             anyhow::bail!("network settings are read-only");
//!         }
//!         Ok(())
//!     }
//!
//!     fn post_set(&self, _path: &str, _value: &str) {}
//! }
//!
//! let store = Store::in_memory()?.with_hooks(Arc::new(ReadOnlyNetwork));
//! assert!(store.set("network/mtu", "1500").is_err());
//! assert!(store.set("display/brightness", "80").is_ok());
//! # Ok::<(), kvtree::Error>(())
//! ```

mod registry;

pub use registry::{HookFn, HookRegistry};

use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receiver of value-write notifications.
///
/// Both calls run synchronously on the thread performing the write, inside the
/// store's critical section and transaction.
pub trait HookDispatch: Send + Sync {
    /// Called before a value is written to `path`. Returning an error aborts
    /// the write and rolls back the whole operation.
    fn pre_set(&self, path: &str, value: &str) -> anyhow::Result<()>;

    /// Called after the value is staged, before the transaction commits.
    fn post_set(&self, path: &str, value: &str);
}

/// Dispatcher that accepts every write and ignores notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl HookDispatch for NoopHooks {
    fn pre_set(&self, _path: &str, _value: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_set(&self, _path: &str, _value: &str) {}
}

/// A dispatcher plus the on/off switch shared by every write on a store.
///
/// Storage operations take a gate rather than a dispatcher so that the
/// switch is honoured everywhere without each caller checking it.
pub struct HookGate {
    dispatch: Arc<dyn HookDispatch>,
    enabled: AtomicBool,
}

impl HookGate {
    /// Wraps a dispatcher, enabled.
    pub fn new(dispatch: Arc<dyn HookDispatch>) -> Self {
        Self {
            dispatch,
            enabled: AtomicBool::new(true),
        }
    }

    /// Turns dispatch on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns true if dispatch is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Runs the pre-set notification, mapping a veto into [`Error::HookRejected`].
    pub fn pre_set(&self, path: &str, value: &str) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.dispatch
            .pre_set(path, value)
            .map_err(|e| Error::HookRejected {
                path: path.to_string(),
                cause: format!("{e:#}"),
            })
    }

    /// Runs the post-set notification.
    pub fn post_set(&self, path: &str, value: &str) {
        if self.is_enabled() {
            self.dispatch.post_set(path, value);
        }
    }
}

impl std::fmt::Debug for HookGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookGate")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Default for HookGate {
    fn default() -> Self {
        Self::new(Arc::new(NoopHooks))
    }
}
