//! hotview - live view reload between a development host and a device.

use anyhow::Result;
use clap::{ColorChoice, Parser};
use hotview::{
    cli::{self, Cli, Commands},
    config::HotConfig,
    core,
};

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let config = HotConfig::load(&cli)?;

    match &cli.command {
        Commands::Serve { .. } => cli::serve::serve(&config),
        Commands::Device { package } => cli::device::device(&config, package.as_deref()),
        Commands::Synth { files } => cli::synth::synth(&config, files),
    }
}
