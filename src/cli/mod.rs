//! Command-line interface module.

mod args;
pub mod device;
pub mod serve;
pub mod synth;

pub use args::{Cli, Commands};
