//! Core types - process-wide session state shared across the codebase.

mod state;

pub use state::{is_shutdown, register_shutdown, setup_shutdown_handler};
