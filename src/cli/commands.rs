//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - agbot: simulate agbots checking for agreements
//! - node: simulate nodes registering and heartbeating
//! - probe: time a run of identical GETs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Loadsim - interval-paced load simulation for exchange REST APIs
#[derive(Parser, Debug)]
#[command(name = "loadsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Simulate agbots looking for nodes to make agreements with
    Agbot {
        /// Base for the ids of every resource this instance creates
        name_base: String,
    },

    /// Simulate nodes registering, heartbeating and unregistering
    Node {
        /// Base for the ids of every resource this instance creates
        name_base: String,

        /// Share services and patterns with other instances on this host
        short_hostname: Option<String>,
    },

    /// Time a run of identical node GETs
    Probe {
        /// Number of GETs to issue
        num_times: u32,
    },
}

impl Commands {
    /// Name used for the report subdirectory.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Agbot { .. } => "agbot",
            Commands::Node { .. } => "node",
            Commands::Probe { .. } => "probe",
        }
    }
}
