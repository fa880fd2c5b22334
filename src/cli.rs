//! Command-line interface for procexec.
//!
//! Uses lexopt for minimal binary size overhead. Everything from the first
//! positional argument on is the command to run, so its own options never
//! need a `--` separator.

use std::ffi::OsString;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Program and arguments to run.
    pub command: Vec<String>,
    /// Deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Grace period for closing streams, in milliseconds.
    pub close_timeout_ms: Option<u64>,
    /// Accepted exit codes. Empty accepts any.
    pub exit_codes: Vec<i32>,
    /// Working directory for the command.
    pub directory: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Keep stderr separate from stdout.
    pub separate_stderr: bool,
    /// Leave the command running when the deadline elapses.
    pub no_destroy: bool,
    /// Destroy the command if procexec itself is terminated.
    pub destroy_on_exit: bool,
    /// Forward procexec's stdin to the command.
    pub stdin: bool,
    /// Send the command's output to the log instead of stdout/stderr.
    pub log_output: bool,
    /// Discard the command's output.
    pub quiet: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('t') | Long("timeout") => {
                result.timeout_ms = Some(parse_number(&mut parser, "timeout")?);
            }
            Long("close-timeout") => {
                result.close_timeout_ms = Some(parse_number(&mut parser, "close-timeout")?);
            }
            Short('e') | Long("exit-code") => {
                result.exit_codes.push(parse_number(&mut parser, "exit-code")?);
            }
            Short('C') | Long("directory") => {
                result.directory = Some(parser.value()?.parse()?);
            }
            Long("env") => {
                let value: String = parser.value()?.parse()?;
                let (key, val) = value
                    .split_once('=')
                    .filter(|(key, _)| !key.is_empty())
                    .ok_or_else(|| ArgsError::InvalidValue("env", value.clone()))?;
                result.env.push((key.to_string(), val.to_string()));
            }
            Long("separate-stderr") => {
                result.separate_stderr = true;
            }
            Long("no-destroy") => {
                result.no_destroy = true;
            }
            Long("destroy-on-exit") => {
                result.destroy_on_exit = true;
            }
            Short('i') | Long("stdin") => {
                result.stdin = true;
            }
            Long("log-output") => {
                result.log_output = true;
            }
            Short('q') | Long("quiet") => {
                result.quiet = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(program) => {
                result.command.push(program.string()?);
                for arg in parser.raw_args()? {
                    result.command.push(arg.string()?);
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

fn parse_number<T: std::str::FromStr>(
    parser: &mut lexopt::Parser,
    name: &'static str,
) -> Result<T, ArgsError> {
    use lexopt::ValueExt;

    let value: String = parser.value()?.parse()?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidValue(name, value))
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"procexec {version}
Run a command with a deadline, exit code checks and clean teardown

USAGE:
    procexec [OPTIONS] [--] <COMMAND> [ARGS...]

OPTIONS:
    -t, --timeout <MS>        Stop the command after this many milliseconds
    -e, --exit-code <CODE>    Accepted exit code (repeatable) [default: any]
        --close-timeout <MS>  Give up closing streams after this many milliseconds
    -C, --directory <DIR>     Working directory for the command
        --env <KEY=VALUE>     Extra environment variable (repeatable)
        --separate-stderr     Relay stderr separately instead of merging it into stdout
        --no-destroy          Leave the command running when the timeout elapses
        --destroy-on-exit     Destroy the command if procexec is terminated
    -i, --stdin               Forward standard input to the command
        --log-output          Log the command's output instead of printing it
    -q, --quiet               Discard the command's output
    -c, --config <FILE>       Path to configuration file (JSON)
    -l, --log-level <LVL>     Log level (error, warn, info, debug, trace)
    -h, --help                Print help
    -V, --version             Print version

ENVIRONMENT VARIABLES:
    PROCEXEC_TIMEOUT_MS        Timeout (overrides config)
    PROCEXEC_CLOSE_TIMEOUT_MS  Close timeout (overrides config)
    PROCEXEC_EXIT_CODES        Comma separated accepted exit codes (overrides config)
    PROCEXEC_LOG_LEVEL         Log level (overrides config)
    RUST_LOG                   Alternative log level setting

EXIT STATUS:
    The command's exit code on success, 124 on timeout, 1 on any other failure.

EXAMPLES:
    # Fail unless the build finishes within a minute with exit code 0
    procexec -t 60000 -e 0 cargo build

    # Keep stderr apart and log both streams
    procexec --separate-stderr --log-output -l debug ./script.sh
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("procexec {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
