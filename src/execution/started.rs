//! Handles to launches that run in the background.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::result::ProcessResult;
use super::waiter::{Waiter, WaiterState, WorkerTracker};
use crate::context::TaskContext;
use crate::error::ExecError;
use crate::process::{CancelReason, CancelToken, ProcessHandle};
use crate::Result;

/// A running process together with the future of its outcome.
pub struct StartedProcess {
    process: ProcessHandle,
    future: ProcessFuture,
}

impl StartedProcess {
    pub(crate) fn new(process: ProcessHandle, future: ProcessFuture) -> Self {
        Self { process, future }
    }

    /// The live process.
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    pub fn future(&self) -> &ProcessFuture {
        &self.future
    }

    pub fn into_future(self) -> ProcessFuture {
        self.future
    }

    /// Block until the launch completes.
    pub fn wait(self) -> Result<ProcessResult> {
        self.future.get()
    }
}

impl fmt::Debug for StartedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartedProcess")
            .field("process", &self.process.to_string())
            .field("state", &self.future.state())
            .finish()
    }
}

/// Where the single outcome of a launch lands.
struct Completion {
    outcome: Mutex<Option<Result<ProcessResult>>>,
    ready: Condvar,
}

impl Completion {
    fn lock(&self) -> MutexGuard<'_, Option<Result<ProcessResult>>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `outcome` unless one is already there. Returns whether it was stored.
    fn resolve(&self, outcome: Result<ProcessResult>) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.ready.notify_all();
        true
    }
}

/// Resolves the completion with [`ExecError::WorkerLost`] if the waiter
/// thread unwinds before delivering.
struct Delivery {
    completion: Arc<Completion>,
    process: String,
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.completion.resolve(Err(ExecError::WorkerLost {
            process: std::mem::take(&mut self.process),
        }));
    }
}

/// The single outcome of a background launch.
///
/// Resolves exactly once, to either a [`ProcessResult`] or an
/// [`ExecError`]. Cancelling resolves it to [`ExecError::Cancelled`] at
/// once; stopping the process, closing its streams and the `after_stop`
/// listeners then finish on the waiter thread.
pub struct ProcessFuture {
    process: String,
    cancel: CancelToken,
    pub(crate) tracker: WorkerTracker,
    completion: Arc<Completion>,
}

impl ProcessFuture {
    /// Run `waiter` on its own thread.
    pub(crate) fn spawn(waiter: Waiter, ctx: &TaskContext) -> Result<Self> {
        let name = match waiter.process.id() {
            Some(pid) => format!("process-waiter-{}", pid),
            None => "process-waiter".to_string(),
        };
        let process = waiter.process.to_string();
        let cancel = waiter.cancel.clone();
        let tracker = waiter.tracker.clone();
        let completion = Arc::new(Completion {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        });

        let delivery = Delivery {
            completion: Arc::clone(&completion),
            process: process.clone(),
        };
        ctx.spawn(name, move || {
            let outcome = waiter.run();
            delivery.completion.resolve(outcome);
        })?;

        Ok(Self {
            process,
            cancel,
            tracker,
            completion,
        })
    }

    fn lost(&self) -> ExecError {
        ExecError::WorkerLost {
            process: self.process.clone(),
        }
    }

    /// Whether the outcome is available.
    pub fn is_done(&self) -> bool {
        self.completion.lock().is_some()
    }

    /// Block for up to `timeout` for the outcome. Returns whether it is available.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let slot = self.completion.lock();
        let (slot, _) = self
            .completion
            .ready
            .wait_timeout_while(slot, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.is_some()
    }

    /// Ask the launch to stop. Returns `false` if it already completed or
    /// was already stopped.
    pub fn cancel(&self) -> bool {
        let error = ExecError::Cancelled {
            process: self.process.clone(),
        };
        self.cancel_with(CancelReason::Cancelled, error)
    }

    /// Stop the launch for `reason` and resolve the future with `error`.
    ///
    /// The token is set first, so a waiter that has not delivered yet always
    /// sees the request.
    pub(crate) fn cancel_with(&self, reason: CancelReason, error: ExecError) -> bool {
        if self.cancel.is_cancelled() || !self.cancel.cancel_with(reason) {
            return false;
        }
        self.completion.resolve(Err(error))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Block until the outcome is available and return it.
    pub fn get(self) -> Result<ProcessResult> {
        let lost = self.lost();
        let slot = self.completion.lock();
        let mut slot = self
            .completion
            .ready
            .wait_while(slot, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.take().unwrap_or(Err(lost))
    }

    /// Await the outcome without blocking the async runtime.
    pub async fn join(self) -> Result<ProcessResult> {
        let lost = self.lost();
        tokio::task::spawn_blocking(move || self.get())
            .await
            .unwrap_or(Err(lost))
    }

    /// Where the launch stands right now.
    pub fn state(&self) -> WaiterState {
        self.tracker.state()
    }
}

impl fmt::Debug for ProcessFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessFuture")
            .field("process", &self.process)
            .field("state", &self.state())
            .finish()
    }
}
