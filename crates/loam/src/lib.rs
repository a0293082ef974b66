// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

//! loam - a local toolchain controller for Pig data-flow projects
//!
//! loam provisions a pinned runtime engine (Pig 0.9 or 0.12), its Jython
//! scripting runtime, Hadoop and the Sqoop connector under the project's
//! install root, then runs Pig scripts, Python control scripts and workflow
//! scripts against them in local mode.
//!
//! The library half exposes the pieces the binary wires together:
//!
//! - [`controller::ToolchainController`] - verify dependencies, assemble
//!   parameters and execute one request
//! - [`runner::ScriptRunner`] - the seam between the controller and the
//!   child process
//! - [`template::TemplateRenderer`] - strict rendering of runner scripts
//! - [`cli`] and [`commands`] - argument parsing and dispatch

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

/// CLI argument parsing and exit codes.
pub mod cli;
/// Dispatch from parsed arguments to the controller.
pub mod commands;
/// Per-invocation lifecycle and command assembly.
pub mod controller;
/// `.gitignore` maintenance for the install root.
pub mod gitignore;
/// Java and Python detection.
pub mod prereq;
/// Child process execution.
pub mod runner;
/// Interrupt forwarding to child processes.
pub mod signals;
/// Runner script templates.
pub mod template;
/// Tracing and logging configuration.
pub mod tracing;

// Re-export public API
pub use controller::{ControllerState, Request, ToolchainController};
pub use loam_core::{Error, Result};
pub use runner::{ExitOutcome, Invocation, ProcessRunner, ScriptRunner};
