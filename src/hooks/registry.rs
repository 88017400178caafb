//! Per-path hook registry.
//!
//! [`HookRegistry`] is the stock [`HookDispatch`]: callbacks are registered
//! against an exact path and run in registration order. Pre-set callbacks run
//! inline and the first error vetoes the write. Post-set callbacks run either
//! inline or on a detached thread; their errors are logged and never reach the
//! writer.

use super::HookDispatch;
use crate::path;
use crate::storage::sqlite::acquire_lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A registered callback, called with the normalized path and the new value.
pub type HookFn = Arc<dyn Fn(&str, &str) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct PostHook {
    callback: HookFn,
    run_async: bool,
}

#[derive(Default)]
struct PathHooks {
    pre: Vec<HookFn>,
    post: Vec<PostHook>,
}

/// Hook callbacks keyed by normalized path.
///
/// A registry belongs to the store it is attached to with
/// [`Store::with_hooks`](crate::Store::with_hooks). Freshly opened stores
/// start with no hooks at all.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Mutex<HashMap<String, PathHooks>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-set callback for `path`.
    ///
    /// Callbacks for one path run in the order they were registered; the
    /// first one returning an error stops the rest and vetoes the write.
    pub fn register_pre_set<F>(&self, path: &str, callback: F)
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let path = path::normalize(path);
        tracing::debug!(path = %path, "Registered pre-set hook");
        acquire_lock(&self.hooks)
            .entry(path)
            .or_default()
            .pre
            .push(Arc::new(callback));
    }

    /// Adds a post-set callback for `path`.
    ///
    /// With `run_async` the callback runs on its own thread and the write
    /// does not wait for it.
    pub fn register_post_set<F>(&self, path: &str, callback: F, run_async: bool)
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let path = path::normalize(path);
        tracing::debug!(path = %path, run_async, "Registered post-set hook");
        acquire_lock(&self.hooks)
            .entry(path)
            .or_default()
            .post
            .push(PostHook {
                callback: Arc::new(callback),
                run_async,
            });
    }

    /// Removes every callback.
    pub fn clear(&self) {
        acquire_lock(&self.hooks).clear();
    }

    /// Number of callbacks registered for `path`, pre and post together.
    #[must_use]
    pub fn hook_count(&self, path: &str) -> usize {
        acquire_lock(&self.hooks)
            .get(&path::normalize(path))
            .map_or(0, |hooks| hooks.pre.len() + hooks.post.len())
    }

    // Callbacks are cloned out so none of them runs under the registry lock.
    fn pre_hooks(&self, path: &str) -> Vec<HookFn> {
        acquire_lock(&self.hooks)
            .get(path)
            .map(|hooks| hooks.pre.clone())
            .unwrap_or_default()
    }

    fn post_hooks(&self, path: &str) -> Vec<PostHook> {
        acquire_lock(&self.hooks)
            .get(path)
            .map(|hooks| hooks.post.clone())
            .unwrap_or_default()
    }
}

impl HookDispatch for HookRegistry {
    fn pre_set(&self, path: &str, value: &str) -> anyhow::Result<()> {
        for callback in self.pre_hooks(path) {
            callback(path, value)?;
        }
        Ok(())
    }

    fn post_set(&self, path: &str, value: &str) {
        for hook in self.post_hooks(path) {
            if !hook.run_async {
                if let Err(e) = (hook.callback)(path, value) {
                    tracing::warn!(path = %path, error = %e, "Post-set hook failed");
                }
                continue;
            }

            let owned_path = path.to_string();
            let owned_value = value.to_string();
            let spawned = std::thread::Builder::new()
                .name("kvtree-post-set".to_string())
                .spawn(move || {
                    if let Err(e) = (hook.callback)(&owned_path, &owned_value) {
                        tracing::warn!(path = %owned_path, error = %e, "Async post-set hook failed");
                    }
                });
            if let Err(e) = spawned {
                metrics::counter!("kvtree_hook_spawn_failures_total").increment(1);
                tracing::warn!(path = %path, error = %e, "Could not spawn post-set hook thread");
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("paths", &acquire_lock(&self.hooks).len())
            .finish()
    }
}
