//! Launching processes and seeing them through to one outcome.
//!
//! This module provides:
//! - [`ProcessExecutor`]: the launcher and its builder surface
//! - Synchronous [`execute`](ProcessExecutor::execute) with an optional deadline
//! - Background [`start`](ProcessExecutor::start) returning a [`StartedProcess`]
//! - Stopping ([`ProcessStopper`]) and closing ([`ProcessCloser`]) strategies
//! - Exit code validation against [`ExitCodes`]
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use process_executor::execution::ProcessExecutor;
//!
//! let started = ProcessExecutor::new()
//!     .command(["sleep", "60"])
//!     .start()?;
//! started.future().cancel();
//! assert!(started.wait().is_err());
//!
//! let err = ProcessExecutor::new()
//!     .command(["sleep", "60"])
//!     .timeout(Duration::from_secs(1))
//!     .execute()
//!     .unwrap_err();
//! assert!(err.is_timeout());
//! # Ok::<(), process_executor::ExecError>(())
//! ```

mod attributes;
mod closer;
mod executor;
mod exit;
mod result;
mod started;
mod stopper;
mod waiter;

pub use attributes::{CommandDisplay, EnvironmentDisplay, ProcessAttributes};
pub use closer::ProcessCloser;
pub use executor::ProcessExecutor;
pub use exit::{check_exit, ExitCodes, MAX_OUTPUT_IN_MESSAGE};
pub use result::{ProcessOutput, ProcessResult};
pub use started::{ProcessFuture, StartedProcess};
pub use stopper::ProcessStopper;
pub use waiter::{WaiterPhase, WaiterState};
