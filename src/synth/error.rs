//! Synthesis error types.

use std::path::PathBuf;

use thiserror::Error;

use super::fragment::FragmentIssue;

/// A synthesis attempt failed; the previously emitted unit stays in effect.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("markup-loading call not found in generated fragment `{0}`")]
    LoaderCallNotFound(PathBuf),

    #[error("cannot use fragment `{path}`: {issue}")]
    Fragment {
        path: PathBuf,
        #[source]
        issue: FragmentIssue,
    },

    #[error("failed to read fragment `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("no class declaration in `{0}`")]
    NoDeclaration(PathBuf),

    #[error("invalid loader pattern")]
    LoaderPattern(#[from] regex::Error),
}

/// The markup code-generator could not regenerate a behind-code fragment.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator command is empty")]
    NotConfigured,

    #[error("generator failed for `{path}`: {message}")]
    Failed { path: PathBuf, message: String },
}
