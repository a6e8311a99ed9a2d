//! hotview - live view reload.
//!
//! The development host merges a view's markup and partial code documents
//! into one versioned unit and ships it over a persistent channel to a
//! device, which evaluates it and previews the result.
//!
//! ```text
//! host:   edits ─► synth::ClassSynthesizer ─► channel::DeviceChannel ──┐
//!                                                                      │
//! device: dispatch::EvalDispatcher ◄─ channel::DeviceChannel ◄─────────┘
//!           └─► dispatch::RenderScheduler ─► PreviewSurface
//! ```

pub mod channel;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod freshness;
pub mod logger;
pub mod style;
pub mod synth;
pub mod utils;
