//! `[evaluator]` section configuration.
//!
//! ```toml
//! [evaluator]
//! command = ["dotnet", "script", "eval", "-"]   # emitted unit is piped to stdin
//! ```

use serde::{Deserialize, Serialize};

/// Device-side evaluator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Command receiving the emitted unit on stdin.
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_evaluator_command() {
        let config = test_parse_config("[evaluator]\ncommand = [\"csi\", \"-\"]");
        assert_eq!(config.evaluator.command, ["csi", "-"]);
        assert!(test_parse_config("").evaluator.command.is_empty());
    }
}
