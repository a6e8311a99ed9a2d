//! Utility modules shared by the host and device sides.

pub mod exec;
