//! Process handle abstraction.
//!
//! The executor never talks to `std::process::Child` directly. Everything
//! after spawning goes through the [`Process`] trait:
//! - Non-blocking exit status query and a cancellable wait
//! - Forceful termination
//! - Hand-off of the three standard streams to the pumps
//! - Closing whatever stream handles the process still owns

mod native;
#[cfg(test)]
pub(crate) mod testing;

pub use native::NativeProcess;

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interval between exit status polls while waiting.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared handle to a running process.
pub type ProcessHandle = Arc<dyn Process>;

/// One of the three standard streams of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process exited with the given code.
    Exited(i32),
    /// Waiting was abandoned before the process exited.
    Stopped(CancelReason),
}

/// A launched external process.
///
/// Implementations must be cheap to query concurrently: the waiter polls
/// [`Process::try_exit_code`] while a stopper may call
/// [`Process::destroy`] from another thread.
pub trait Process: fmt::Display + Send + Sync {
    /// OS process id, if the platform exposes one.
    fn id(&self) -> Option<u32>;

    /// Exit code if the process has exited, `None` while it is running.
    fn try_exit_code(&self) -> io::Result<Option<i32>>;

    /// Request forceful termination without waiting for it to take effect.
    ///
    /// Must not fail for a process that has already exited.
    fn destroy(&self) -> io::Result<()>;

    /// Take the child's stdout. Returns `None` once taken.
    fn take_stdout(&self) -> Option<Box<dyn Read + Send>>;

    /// Take the child's stderr. `None` when merged into stdout or once taken.
    fn take_stderr(&self) -> Option<Box<dyn Read + Send>>;

    /// Take the child's stdin. Dropping the writer closes the pipe.
    fn take_stdin(&self) -> Option<Box<dyn Write + Send>>;

    /// Close the given stream if the process still owns it.
    fn close(&self, stream: StreamKind) -> io::Result<()>;

    /// Block until the process exits or `cancel` fires.
    fn wait_for(&self, cancel: &CancelToken) -> io::Result<WaitOutcome> {
        loop {
            if let Some(code) = self.try_exit_code()? {
                return Ok(WaitOutcome::Exited(code));
            }
            if let Some(reason) = cancel.reason() {
                return Ok(WaitOutcome::Stopped(reason));
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

/// Why a wait was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's deadline elapsed.
    Timeout,
    /// The caller cancelled the asynchronous result.
    Cancelled,
    /// The host interrupted the wait.
    Interrupted,
}

impl CancelReason {
    fn to_u8(self) -> u8 {
        match self {
            Self::Timeout => 1,
            Self::Cancelled => 2,
            Self::Interrupted => 3,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Timeout),
            2 => Some(Self::Cancelled),
            3 => Some(Self::Interrupted),
            _ => None,
        }
    }
}

/// Cloneable cancellation flag that remembers the first reason given.
///
/// A token created with [`CancelToken::child`] also observes its parent,
/// so a host-wide interrupt token reaches every launch without one
/// launch's cancellation leaking to the others.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
    parent: Option<Arc<AtomicU8>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that is also cancelled when `self` is.
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(0)),
            parent: Some(Arc::clone(&self.state)),
        }
    }

    /// Cancel with `reason`. Returns `false` if already cancelled.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.state
            .compare_exchange(0, reason.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::Cancelled)
    }

    pub fn interrupt(&self) -> bool {
        self.cancel_with(CancelReason::Interrupted)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        CancelReason::from_u8(self.state.load(Ordering::Acquire)).or_else(|| {
            self.parent
                .as_ref()
                .and_then(|p| CancelReason::from_u8(p.load(Ordering::Acquire)))
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }
}
