//! Waiting for a launch to finish and driving its teardown.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::attributes::ProcessAttributes;
use super::closer::{describe_duration, ProcessCloser};
use super::exit::{append_context, check_exit};
use super::result::{ProcessOutput, ProcessResult};
use super::stopper::ProcessStopper;
use crate::error::ExecError;
use crate::listener::ListenerBus;
use crate::process::{CancelReason, CancelToken, ProcessHandle, WaitOutcome};
use crate::stream::StreamPumpSet;
use crate::Result;

/// Where a launch stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    Running,
    /// The process exited on its own.
    Finished,
    /// The process was stopped because the deadline elapsed.
    DestroyedOnTimeout,
    /// The process was stopped because the wait was cancelled or interrupted.
    DestroyedOnCancel,
}

/// What the waiter is doing, for timeout diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterPhase {
    Waiting,
    Stopping,
    Closing,
    CheckingExit,
    Notifying,
}

impl fmt::Display for WaiterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting for the process to exit",
            Self::Stopping => "stopping the process",
            Self::Closing => "closing streams",
            Self::CheckingExit => "checking the exit value",
            Self::Notifying => "notifying listeners",
        })
    }
}

struct WorkerInfo {
    thread: Option<String>,
    phase: Option<WaiterPhase>,
    state: WaiterState,
}

/// Shared view of the thread running a waiter.
#[derive(Clone)]
pub(crate) struct WorkerTracker(Arc<Mutex<WorkerInfo>>);

impl Default for WorkerTracker {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(WorkerInfo {
            thread: None,
            phase: None,
            state: WaiterState::Running,
        })))
    }
}

impl WorkerTracker {
    fn lock(&self) -> MutexGuard<'_, WorkerInfo> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) {
        let current = std::thread::current();
        let name = current
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", current.id()));
        self.lock().thread = Some(name);
    }

    fn phase(&self, phase: WaiterPhase) {
        self.lock().phase = Some(phase);
    }

    fn set_state(&self, state: WaiterState) {
        self.lock().state = state;
    }

    fn clear(&self) {
        let mut info = self.lock();
        info.thread = None;
        info.phase = None;
    }

    pub(crate) fn state(&self) -> WaiterState {
        self.lock().state
    }

    /// `worker thread 'name' was <phase>`, while a worker is active.
    pub(crate) fn describe(&self) -> Option<String> {
        let info = self.lock();
        let thread = info.thread.as_ref()?;
        Some(match info.phase {
            Some(phase) => format!("worker thread '{}' was {}", thread, phase),
            None => format!("worker thread '{}' had not started waiting", thread),
        })
    }
}

/// Everything needed to see one launch through to its outcome.
pub(crate) struct Waiter {
    pub(crate) process: ProcessHandle,
    pub(crate) attributes: ProcessAttributes,
    pub(crate) stopper: ProcessStopper,
    pub(crate) closer: ProcessCloser,
    pub(crate) pumps: Arc<StreamPumpSet>,
    pub(crate) listeners: ListenerBus,
    pub(crate) cancel: CancelToken,
    pub(crate) deadline: Option<Duration>,
    pub(crate) tracker: WorkerTracker,
}

impl Waiter {
    /// Wait for the process, close it down and produce the outcome.
    ///
    /// `after_stop` listeners run on every path, after everything else.
    pub(crate) fn run(self) -> Result<ProcessResult> {
        self.tracker.enter();
        let outcome = self.wait_and_finish();
        self.listeners.after_stop(&self.process);
        self.tracker.clear();
        outcome
    }

    fn wait_and_finish(&self) -> Result<ProcessResult> {
        self.tracker.phase(WaiterPhase::Waiting);
        let waited = self.process.wait_for(&self.cancel);

        let finished = matches!(waited, Ok(WaitOutcome::Exited(_)));
        self.tracker.set_state(match waited {
            Ok(WaitOutcome::Exited(_)) => WaiterState::Finished,
            Ok(WaitOutcome::Stopped(CancelReason::Timeout)) => WaiterState::DestroyedOnTimeout,
            _ => WaiterState::DestroyedOnCancel,
        });
        if !finished {
            self.tracker.phase(WaiterPhase::Stopping);
            self.stopper.stop(self.process.as_ref());
        }
        self.tracker.phase(WaiterPhase::Closing);
        let closed = self.closer.close(&self.process, &self.pumps);

        let exit_code = match waited {
            Ok(WaitOutcome::Exited(code)) => {
                closed?;
                code
            }
            Ok(WaitOutcome::Stopped(reason)) => {
                if let Err(e) = closed {
                    warn!(process = %self.process, error = %e, "failed to close stopped process");
                }
                return Err(self.stopped_error(reason));
            }
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!(process = %self.process, error = %close_err, "failed to close process");
                }
                return Err(ExecError::Io(e));
            }
        };
        debug!(process = %self.process, exit_code, "process finished");

        self.tracker.phase(WaiterPhase::CheckingExit);
        let result = check_exit(
            &self.attributes,
            ProcessResult::new(exit_code, self.pumps.captured()),
        )?;

        self.tracker.phase(WaiterPhase::Notifying);
        self.listeners
            .after_finish(&self.process, &result)
            .map_err(|source| ExecError::Listener {
                process: self.process.to_string(),
                source,
            })?;
        Ok(result)
    }

    fn stopped_error(&self, reason: CancelReason) -> ExecError {
        let process = self.process.to_string();
        match reason {
            CancelReason::Timeout => timeout_error(
                &self.process,
                &self.attributes,
                self.deadline.unwrap_or_default(),
                self.pumps.captured().as_ref(),
                None,
            ),
            CancelReason::Cancelled => ExecError::Cancelled { process },
            CancelReason::Interrupted => ExecError::Interrupted { process },
        }
    }
}

/// Build the failure reported when `deadline` elapsed.
pub(crate) fn timeout_error(
    process: &ProcessHandle,
    attributes: &ProcessAttributes,
    deadline: Duration,
    output: Option<&ProcessOutput>,
    worker: Option<String>,
) -> ExecError {
    let exit_code = process.try_exit_code().ok().flatten();
    let mut message = format!(
        "Timed out waiting for {} to finish, timeout: {}",
        process,
        describe_duration(deadline)
    );
    if let Some(code) = exit_code {
        message.push_str(&format!(", exit code: {}", code));
    }
    append_context(&mut message, attributes, output);
    if let Some(worker) = &worker {
        message.push_str(&format!(" ({})", worker));
    }
    ExecError::Timeout {
        message,
        deadline,
        exit_code,
        worker,
    }
}
