//! Strategies for terminating a process on timeout or cancellation.

use tracing::{debug, warn};

use crate::process::Process;

/// How a process is stopped when its launch is abandoned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessStopper {
    /// Request forceful termination without waiting for it.
    #[default]
    Destroy,
    /// Leave the process running.
    Nop,
}

impl ProcessStopper {
    /// Stop `process`. Never blocks and never fails; errors are logged.
    pub fn stop(&self, process: &dyn Process) {
        match self {
            Self::Destroy => {
                debug!(process = %process, "destroying process");
                if let Err(e) = process.destroy() {
                    warn!(process = %process, error = %e, "failed to destroy process");
                }
            }
            Self::Nop => {
                debug!(process = %process, "leaving process running");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedProcess;

    #[test]
    fn test_destroy_is_default() {
        assert_eq!(ProcessStopper::default(), ProcessStopper::Destroy);
    }

    #[test]
    fn test_destroy_stopper() {
        let process = ScriptedProcess::new("p");
        ProcessStopper::Destroy.stop(&process);
        assert_eq!(process.destroy_count(), 1);
        assert!(process.try_exit_code().unwrap().is_some());
    }

    #[test]
    fn test_destroy_dead_process() {
        let process = ScriptedProcess::new("p");
        process.exit_now(0);
        ProcessStopper::Destroy.stop(&process);
        assert_eq!(process.try_exit_code().unwrap(), Some(0));
    }

    #[test]
    fn test_nop_stopper() {
        let process = ScriptedProcess::new("p");
        ProcessStopper::Nop.stop(&process);
        assert_eq!(process.destroy_count(), 0);
        assert!(process.try_exit_code().unwrap().is_none());
    }
}
