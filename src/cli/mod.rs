//! CLI module for loadsim - command-line interface and subcommands.
//!
//! Provides the main entry point with one subcommand per simulation driver.

pub mod commands;

pub use commands::Cli;
