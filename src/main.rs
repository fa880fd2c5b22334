//! procexec binary entry point.

use std::io;
use std::process;

use process_executor::cli::{self, Args};
use process_executor::config::Config;
use process_executor::{logging, ExecError, ProcessRegistry};
use tracing::debug;

/// Exit status when the command timed out, as coreutils `timeout` uses.
const EXIT_TIMEOUT: i32 = 124;
const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("procexec: {}", e);
            eprintln!("Try 'procexec --help' for more information.");
            process::exit(EXIT_USAGE);
        }
    };

    if args.help {
        cli::print_help();
        return;
    }
    if args.version {
        cli::print_version();
        return;
    }

    let code = run(&args);
    ProcessRegistry::global().shutdown();
    process::exit(code);
}

fn run(args: &Args) -> i32 {
    let config = match Config::load(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("procexec: {}", e);
            return EXIT_FAILURE;
        }
    };

    // Initialize logging
    if let Err(e) = logging::try_init_with(config.log_filter()) {
        eprintln!("procexec: failed to initialize logging: {}", e);
    }
    debug!("procexec v{}", env!("CARGO_PKG_VERSION"));

    if args.command.is_empty() {
        eprintln!("procexec: no command given");
        eprintln!("Try 'procexec --help' for more information.");
        return EXIT_USAGE;
    }

    let mut executor = match config.to_executor(&args.command) {
        Ok(executor) => executor,
        Err(e) => {
            eprintln!("procexec: {}", e);
            return EXIT_FAILURE;
        }
    };

    let merged = executor.is_redirect_error_stream();
    if args.log_output {
        executor.redirect_output_as_info("stdout");
        if !merged {
            executor.redirect_error_as_info("stderr");
        }
    } else if !args.quiet {
        executor.redirect_output(io::stdout());
        if !merged {
            executor.redirect_error(io::stderr());
        }
    }
    if args.stdin {
        executor.redirect_input(io::stdin());
    }

    match executor.execute() {
        Ok(result) => {
            debug!(exit_code = result.exit_code(), "command finished");
            result.exit_code()
        }
        Err(e) => {
            eprintln!("procexec: {}", e);
            match e {
                ExecError::Timeout { .. } => EXIT_TIMEOUT,
                _ => EXIT_FAILURE,
            }
        }
    }
}
