//! `[session]` section configuration.

use serde::{Deserialize, Serialize};

/// Authoring-session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of view classes kept; least recently edited are evicted.
    pub capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}
