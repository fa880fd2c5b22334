//! Lifecycle observers.
//!
//! A [`ProcessListener`] is notified at four points of every launch:
//! before the process is spawned, right after it started, after it
//! finished successfully and, on every path, after it stopped.
//! [`ListenerBus`] keeps them in registration order.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::BoxError;
use crate::execution::{ProcessExecutor, ProcessResult};
use crate::process::ProcessHandle;

/// Observer of process lifecycle events. Every hook defaults to a no-op.
pub trait ProcessListener: Send + Sync + 'static {
    /// Called before the process is spawned. May reconfigure the executor.
    fn before_start(&self, _executor: &mut ProcessExecutor) {}

    /// Called once the process and its pumps are running.
    fn after_start(&self, _process: &ProcessHandle, _executor: &ProcessExecutor) {}

    /// Called after the process finished and its exit code was accepted.
    ///
    /// An error here replaces the result of the launch.
    fn after_finish(
        &self,
        _process: &ProcessHandle,
        _result: &ProcessResult,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called exactly once per launch, whatever its outcome.
    fn after_stop(&self, _process: &ProcessHandle) {}
}

#[derive(Clone)]
struct Entry {
    kind: TypeId,
    listener: Arc<dyn ProcessListener>,
}

impl Entry {
    fn is(&self, listener: *const ()) -> bool {
        Arc::as_ptr(&self.listener) as *const () == listener
    }
}

/// Ordered, thread-safe set of listeners.
///
/// Mutations replace the list wholesale, so notifications always iterate
/// over a consistent snapshot even while other threads add or remove
/// listeners. Cloning freezes the current set: later changes to either
/// bus do not affect the other.
#[derive(Default)]
pub struct ListenerBus {
    entries: RwLock<Arc<Vec<Entry>>>,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Vec<Entry>> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Entry>)) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut entries = Vec::clone(&guard);
        f(&mut entries);
        *guard = Arc::new(entries);
    }

    /// Register a listener, returning a handle usable with [`ListenerBus::remove`].
    pub fn add<L: ProcessListener>(&self, listener: L) -> Arc<L> {
        let listener = Arc::new(listener);
        self.add_shared(Arc::clone(&listener));
        listener
    }

    /// Register a listener that is shared with the caller.
    pub fn add_shared<L: ProcessListener>(&self, listener: Arc<L>) {
        self.update(|entries| {
            entries.push(Entry {
                kind: TypeId::of::<L>(),
                listener,
            })
        });
    }

    /// Unregister one specific listener instance.
    pub fn remove<L: ProcessListener>(&self, listener: &Arc<L>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut removed = false;
        self.update(|entries| {
            if let Some(pos) = entries.iter().position(|e| e.is(target)) {
                entries.remove(pos);
                removed = true;
            }
        });
        removed
    }

    /// Unregister every listener of type `L`.
    pub fn remove_all<L: ProcessListener>(&self) -> usize {
        let kind = TypeId::of::<L>();
        let mut removed = 0;
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|e| e.kind != kind);
            removed = before - entries.len();
        });
        removed
    }

    pub fn clear(&self) {
        self.update(Vec::clear);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Whether a listener of type `L` is registered.
    pub fn contains<L: ProcessListener>(&self) -> bool {
        let kind = TypeId::of::<L>();
        self.snapshot().iter().any(|e| e.kind == kind)
    }

    pub fn before_start(&self, executor: &mut ProcessExecutor) {
        for entry in self.snapshot().iter() {
            entry.listener.before_start(executor);
        }
    }

    pub fn after_start(&self, process: &ProcessHandle, executor: &ProcessExecutor) {
        for entry in self.snapshot().iter() {
            entry.listener.after_start(process, executor);
        }
    }

    /// Notify listeners in order, stopping at the first failure.
    pub fn after_finish(
        &self,
        process: &ProcessHandle,
        result: &ProcessResult,
    ) -> Result<(), BoxError> {
        for entry in self.snapshot().iter() {
            entry.listener.after_finish(process, result)?;
        }
        Ok(())
    }

    pub fn after_stop(&self, process: &ProcessHandle) {
        for entry in self.snapshot().iter() {
            entry.listener.after_stop(process);
        }
    }
}

impl Clone for ListenerBus {
    fn clone(&self) -> Self {
        Self {
            entries: RwLock::new(self.snapshot()),
        }
    }
}

impl fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBus")
            .field("listeners", &self.len())
            .finish()
    }
}
