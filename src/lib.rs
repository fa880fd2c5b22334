//! # process-executor
//!
//! Launch external processes and manage their whole lifecycle.
//!
//! A launch spawns the child, relays its standard streams on dedicated
//! threads, waits for it under an optional deadline, stops it on timeout,
//! cancellation or host shutdown, closes its stream handles, validates the
//! exit code and reports exactly one outcome: a [`ProcessResult`] or an
//! [`ExecError`].
//!
//! ## Features
//!
//! - **Deadlines**: bounded waits that destroy the child and report a timeout
//! - **Stream pumping**: stdout/stderr relayed to any writer, optionally captured
//! - **Listeners**: hooks before start, after start, after finish and after stop
//! - **Host shutdown**: children registered with the global registry die with the host
//!
//! ## Quick Start
//!
//! ```no_run
//! use process_executor::{ExecError, ProcessExecutor};
//!
//! fn main() -> process_executor::Result<()> {
//!     process_executor::logging::try_init().ok();
//!
//!     let result = ProcessExecutor::new()
//!         .command(["git", "--version"])
//!         .exit_value_normal()
//!         .read_output(true)
//!         .execute()?;
//!     println!("{}", result.output_string());
//!
//!     match ProcessExecutor::new().command(["false"]).exit_value(0).execute() {
//!         Err(ExecError::InvalidExitValue(e)) => println!("exit code {}", e.exit_code()),
//!         other => println!("{:?}", other.map(|r| r.exit_code())),
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod listener;
pub mod logging;
pub mod process;
pub mod registry;
pub mod stream;

// Re-export commonly used types
pub use error::{ExecError, InvalidExitValueError, Result, StreamCloseError};
pub use execution::{
    ExitCodes, ProcessCloser, ProcessExecutor, ProcessFuture, ProcessOutput, ProcessResult,
    ProcessStopper, StartedProcess,
};
pub use listener::{ListenerBus, ProcessListener};
pub use process::{CancelToken, Process, ProcessHandle};
pub use registry::{ProcessRegistry, RegistryListener};
