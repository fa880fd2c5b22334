//! Immutable launch snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::exit::ExitCodes;

/// Configuration captured right before a process is spawned.
///
/// Never changes after capture; used for spawning, exit validation and
/// error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessAttributes {
    command: Vec<String>,
    directory: Option<PathBuf>,
    /// Overlay on the inherited environment. `None` removes the variable.
    environment: BTreeMap<String, Option<String>>,
    allowed_exit_codes: ExitCodes,
}

impl ProcessAttributes {
    pub fn new(
        command: Vec<String>,
        directory: Option<PathBuf>,
        environment: BTreeMap<String, Option<String>>,
        allowed_exit_codes: ExitCodes,
    ) -> Self {
        Self {
            command,
            directory,
            environment,
            allowed_exit_codes,
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn environment(&self) -> &BTreeMap<String, Option<String>> {
        &self.environment
    }

    pub fn allowed_exit_codes(&self) -> &ExitCodes {
        &self.allowed_exit_codes
    }

    /// Command rendered as `[program, arg, ...]`.
    pub fn command_display(&self) -> CommandDisplay<'_> {
        CommandDisplay(&self.command)
    }

    /// Environment overlay rendered as `{KEY=value, GONE=<removed>}`.
    pub fn environment_display(&self) -> EnvironmentDisplay<'_> {
        EnvironmentDisplay(&self.environment)
    }
}

pub struct CommandDisplay<'a>(&'a [String]);

impl fmt::Display for CommandDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

pub struct EnvironmentDisplay<'a>(&'a BTreeMap<String, Option<String>>);

impl fmt::Display for EnvironmentDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                Some(v) => write!(f, "{}={}", key, v)?,
                None => write!(f, "{}=<removed>", key)?,
            }
        }
        f.write_str("}")
    }
}
