//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Live view reload between a development host and a device
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: hotview.toml)
    #[arg(short = 'C', long, global = true, default_value = "hotview.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the development host: accept a device and ship edited views to it.
    ///
    /// Edited file paths are read from stdin, one per line.
    #[command(visible_alias = "s")]
    Serve {
        /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
        #[arg(short, long)]
        interface: Option<std::net::IpAddr>,

        /// Port number to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the device side: connect to the host and evaluate incoming views
    #[command(visible_alias = "d")]
    Device {
        /// Packaged configuration holding the host endpoint (default: the loaded config)
        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        package: Option<PathBuf>,
    },

    /// Synthesize views from the given files once and print the emitted units
    Synth {
        /// Markup or source files, in the order edits would arrive
        #[arg(required = true, value_hint = clap::ValueHint::FilePath)]
        files: Vec<PathBuf>,
    },
}
