//! loam CLI application
//!
//! Parses arguments, sets up tracing and drives one controller request on a
//! single-threaded runtime. The process exits with the child's exit code,
//! 130 when interrupted, or a loam error code.

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

use loam::cli::{self, EXIT_SIGINT, exit_code_for, render_error};
use loam::commands;
use loam::tracing::{self, TracingConfig};

fn main() {
    // NOTE: Using eprintln! in panic hook is intentional - tracing infrastructure
    // may be corrupted during a panic, so we use the most reliable output method.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: cli.tracing_format(),
        level: cli.level.into(),
        ..Default::default()
    };
    if let Err(e) = tracing::init_tracing(tracing_config) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let json_mode = cli.json;
    let exit_code = match rt.block_on(commands::run(cli)) {
        Ok(outcome) if outcome.interrupted => EXIT_SIGINT,
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            render_error(&err, json_mode);
            exit_code_for(&err)
        }
    };
    std::process::exit(exit_code);
}
