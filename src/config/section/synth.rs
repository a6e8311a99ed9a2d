//! `[synth]` section configuration.
//!
//! Controls how view documents are recognized and how the generated
//! behind-code's markup-loading call is rewritten for live evaluation.
//!
//! ```toml
//! [synth]
//! markup_extension = "xaml"
//! source_extension = "cs"
//! generated_suffix = ".g.cs"
//! session_loader = "global::HotView.LiveSession.LoadMarkup"
//! generator = ["dotnet", "xamlg", "{markup}", "-o", "{output}"]
//! ```

use serde::{Deserialize, Serialize};

/// Matches the packaged markup load, e.g.
/// `global::Xamarin.Forms.Xaml.Extensions.LoadFromXaml(this, typeof(MainPage))`.
pub const DEFAULT_LOADER_PATTERN: &str =
    r"(?:global::)?(?:[A-Za-z_]\w*\.)*LoadFromXaml\s*\(\s*this\s*,\s*typeof\s*\(\s*[\w.:]+\s*\)\s*\)";

/// Class synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Extension of markup documents (without dot).
    pub markup_extension: String,

    /// Extension of behavior/partial source documents (without dot).
    pub source_extension: String,

    /// Suffix appended to the markup file name for the generated fragment.
    pub generated_suffix: String,

    /// Regex locating the packaged markup-loading call in the generated fragment.
    pub loader_pattern: String,

    /// Live-session call that replaces the packaged load.
    pub session_loader: String,

    /// Optional markup code-generator command.
    /// `{markup}` and `{output}` are substituted per invocation.
    pub generator: Vec<String>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            markup_extension: "xaml".into(),
            source_extension: "cs".into(),
            generated_suffix: ".g.cs".into(),
            loader_pattern: DEFAULT_LOADER_PATTERN.into(),
            session_loader: "global::HotView.LiveSession.LoadMarkup".into(),
            generator: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_synth_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.synth.markup_extension, "xaml");
        assert_eq!(config.synth.source_extension, "cs");
        assert_eq!(config.synth.generated_suffix, ".g.cs");
        assert!(config.synth.generator.is_empty());
    }

    #[test]
    fn test_synth_generator_command() {
        let config =
            test_parse_config("[synth]\ngenerator = [\"xamlg\", \"{markup}\", \"{output}\"]");
        assert_eq!(config.synth.generator, ["xamlg", "{markup}", "{output}"]);
    }

    #[test]
    fn test_default_loader_pattern_matches() {
        let re = regex::Regex::new(super::DEFAULT_LOADER_PATTERN).unwrap();
        assert!(re.is_match(
            "global::Xamarin.Forms.Xaml.Extensions.LoadFromXaml(this, typeof(MainPage));"
        ));
        assert!(re.is_match("this.LoadFromXaml(this, typeof(global::Demo.MainPage))"));
        assert!(!re.is_match("LoadFromXaml(other, typeof(MainPage))"));
    }
}
