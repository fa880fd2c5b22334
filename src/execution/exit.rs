//! Exit code validation.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use super::attributes::ProcessAttributes;
use super::result::{ProcessOutput, ProcessResult};
use crate::error::{ExecError, InvalidExitValueError};
use crate::Result;

/// Longest captured output quoted in full in an error message.
pub const MAX_OUTPUT_IN_MESSAGE: usize = 5000;

/// Set of exit codes treated as success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExitCodes {
    /// Every exit code is a success.
    #[default]
    Any,
    /// Only the listed codes are successes.
    Only(BTreeSet<i32>),
}

impl ExitCodes {
    pub fn only(codes: impl IntoIterator<Item = i32>) -> Self {
        Self::Only(codes.into_iter().collect())
    }

    /// Only `0` is a success.
    pub fn normal() -> Self {
        Self::only([0])
    }

    pub fn allows(&self, code: i32) -> bool {
        match self {
            Self::Any => true,
            Self::Only(codes) => codes.contains(&code),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for ExitCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Only(codes) => {
                let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
                write!(f, "[{}]", codes.join(", "))
            }
        }
    }
}

/// Check `result` against the allowed exit codes of `attributes`.
pub fn check_exit(attributes: &ProcessAttributes, result: ProcessResult) -> Result<ProcessResult> {
    let allowed = attributes.allowed_exit_codes();
    if allowed.allows(result.exit_code()) {
        return Ok(result);
    }

    let mut message = format!(
        "Unexpected exit value: {}, allowed exit values: {}",
        result.exit_code(),
        allowed
    );
    append_context(&mut message, attributes, result.output());
    Err(ExecError::InvalidExitValue(InvalidExitValueError::new(
        message,
        result,
        allowed.clone(),
    )))
}

/// Append command, directory, environment and output to a failure message.
pub(crate) fn append_context(
    message: &mut String,
    attributes: &ProcessAttributes,
    output: Option<&ProcessOutput>,
) {
    let _ = write!(message, ", executed command {}", attributes.command_display());
    if let Some(dir) = attributes.directory() {
        let _ = write!(message, " in directory {}", dir.display());
    }
    if !attributes.environment().is_empty() {
        let _ = write!(
            message,
            " with environment {}",
            attributes.environment_display()
        );
    }
    if let Some(output) = output {
        let text = output.string();
        let chars = text.chars().count();
        if chars <= MAX_OUTPUT_IN_MESSAGE {
            let _ = write!(
                message,
                ", output was {} bytes:\n{}",
                output.len(),
                text.trim()
            );
        } else {
            let half = MAX_OUTPUT_IN_MESSAGE / 2;
            let head: String = text.chars().take(half).collect();
            let tail: String = text.chars().skip(chars - half).collect();
            let _ = write!(
                message,
                ", output was {} bytes (truncated):\n{}\n...\n{}",
                output.len(),
                head,
                tail.trim()
            );
        }
    }
}
