//! `[style]` section configuration.
//!
//! ```toml
//! [style]
//! extension = "css"
//! root_prefix = "/"                         # "/styles/app.css" is project-root relative
//! root_markers = ["*.csproj", "*.sln", "hotview.toml"]
//! ```

use serde::{Deserialize, Serialize};

/// Stylesheet lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Extension a resolved stylesheet must carry (without dot).
    pub extension: String,

    /// Prefix marking a project-root-relative reference.
    pub root_prefix: String,

    /// File names (or `*.ext` patterns) that mark a project root.
    pub root_markers: Vec<String>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            extension: "css".into(),
            root_prefix: "/".into(),
            root_markers: vec!["*.csproj".into(), "*.sln".into(), "hotview.toml".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_style_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.style.extension, "css");
        assert_eq!(config.style.root_prefix, "/");
        assert!(config.style.root_markers.contains(&"*.csproj".to_string()));
    }

    #[test]
    fn test_style_markers_override() {
        let config = test_parse_config("[style]\nroot_markers = [\"package.json\"]");
        assert_eq!(config.style.root_markers, ["package.json"]);
    }
}
