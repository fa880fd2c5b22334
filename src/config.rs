//! Configuration management for procexec.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::execution::{ProcessExecutor, ProcessStopper};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How commands are launched and supervised.
    pub execution: ExecutionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Execution configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Deadline for the command, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Grace period for closing streams, in milliseconds.
    pub close_timeout_ms: Option<u64>,
    /// Accepted exit codes; absent accepts any.
    pub exit_codes: Option<Vec<i32>>,
    /// Merge stderr into stdout.
    pub redirect_error_stream: bool,
    /// Capture the command's output.
    pub read_output: bool,
    /// Destroy the command when the deadline elapses.
    pub destroy_on_timeout: bool,
    /// Destroy the command when the host is terminated.
    pub destroy_on_exit: bool,
    /// Working directory for the command.
    pub directory: Option<PathBuf>,
    /// Extra environment variables.
    pub environment: BTreeMap<String, String>,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            close_timeout_ms: None,
            exit_codes: None,
            redirect_error_stream: true,
            read_output: false,
            destroy_on_timeout: true,
            destroy_on_exit: false,
            directory: None,
            environment: BTreeMap::new(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides. Unparsable values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(ms) = env_number("PROCEXEC_TIMEOUT_MS") {
            self.execution.timeout_ms = Some(ms);
        }

        if let Some(ms) = env_number("PROCEXEC_CLOSE_TIMEOUT_MS") {
            self.execution.close_timeout_ms = Some(ms);
        }

        if let Ok(codes) = std::env::var("PROCEXEC_EXIT_CODES") {
            if let Some(codes) = parse_exit_codes(&codes) {
                self.execution.exit_codes = Some(codes);
            }
        }

        if let Ok(level) = std::env::var("PROCEXEC_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if args.timeout_ms.is_some() {
            self.execution.timeout_ms = args.timeout_ms;
        }

        if args.close_timeout_ms.is_some() {
            self.execution.close_timeout_ms = args.close_timeout_ms;
        }

        if !args.exit_codes.is_empty() {
            self.execution.exit_codes = Some(args.exit_codes.clone());
        }

        if let Some(ref dir) = args.directory {
            self.execution.directory = Some(dir.clone());
        }

        for (key, value) in &args.env {
            self.execution
                .environment
                .insert(key.clone(), value.clone());
        }

        if args.separate_stderr {
            self.execution.redirect_error_stream = false;
        }

        if args.no_destroy {
            self.execution.destroy_on_timeout = false;
        }

        if args.destroy_on_exit {
            self.execution.destroy_on_exit = true;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Config::default();

        // Load from config file if specified
        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        // Apply environment variable overrides
        config.apply_env();

        // Apply CLI argument overrides (highest priority)
        config.apply_args(args);

        Ok(config)
    }

    /// Reject settings no launch could satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue("timeout_ms", "0".to_string()));
        }
        if self.execution.close_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue("close_timeout_ms", "0".to_string()));
        }
        if matches!(self.execution.exit_codes, Some(ref codes) if codes.is_empty()) {
            return Err(ConfigError::InvalidValue("exit_codes", "[]".to_string()));
        }
        Ok(())
    }

    /// Build an executor for `command` from these settings.
    pub fn to_executor<I, S>(&self, command: I) -> Result<ProcessExecutor, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validate()?;
        let settings = &self.execution;

        let mut executor = ProcessExecutor::new();
        executor
            .command(command)
            .redirect_error_stream(settings.redirect_error_stream)
            .read_output(settings.read_output)
            .environment(settings.environment.clone());

        if let Some(ref dir) = settings.directory {
            executor.directory(dir);
        }
        if let Some(ms) = settings.timeout_ms {
            executor.timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = settings.close_timeout_ms {
            executor.close_timeout(Duration::from_millis(ms));
        }
        match settings.exit_codes {
            Some(ref codes) => executor.exit_values(codes.iter().copied()),
            None => executor.exit_value_any(),
        };
        if !settings.destroy_on_timeout {
            executor.stopper(ProcessStopper::Nop);
        }
        if settings.destroy_on_exit {
            executor.destroy_on_exit();
        }

        Ok(executor)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Parse `0, 3,17` into exit codes. `None` if any entry is not a number.
fn parse_exit_codes(value: &str) -> Option<Vec<i32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| code.parse().ok())
        .collect()
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A setting has a value no launch could use.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidValue(name, value) => write!(f, "invalid value for {}: {}", name, value),
        }
    }
}

impl std::error::Error for ConfigError {}
