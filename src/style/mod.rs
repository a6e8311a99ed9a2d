//! Stylesheet lookup and loading.
//!
//! Markup documents reference auxiliary stylesheets either relative to their
//! own directory (`styles/page.css`) or relative to the project root
//! (`/styles/app.css`). Root-relative references are found by walking upward
//! from the markup's directory until the file exists or a project-root marker
//! is reached:
//!
//! ```text
//! /work/app/App.csproj            ← root marker, walk stops here
//! /work/app/styles/app.css        ← "/styles/app.css" resolves here
//! /work/app/Views/MainPage.xaml   ← walk starts in Views/
//! ```
//!
//! Loading never fails outward: a read error is logged and the previously
//! cached text (if any) stays in effect.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use thiserror::Error;

use crate::config::StyleConfig;

/// Stylesheet read failure (logged, never propagated past the resolver).
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("failed to read stylesheet `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Resolves stylesheet references and caches their text.
pub struct StyleResolver {
    config: StyleConfig,
    cache: DashMap<PathBuf, String>,
}

impl StyleResolver {
    pub fn new(config: StyleConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    /// Resolve `reference` as seen from the markup document at `base_path`.
    ///
    /// Returns `None` when a root-relative reference cannot be found below
    /// the project root.
    pub fn resolve(&self, base_path: &Path, reference: &str) -> Option<PathBuf> {
        let base_dir = base_path.parent().unwrap_or(Path::new(""));

        let Some(stripped) = reference.strip_prefix(self.config.root_prefix.as_str()) else {
            return Some(base_dir.join(reference));
        };
        let stripped = stripped.trim_start_matches(['/', '\\']);
        if stripped.is_empty() {
            return None;
        }

        let mut current = base_dir;
        loop {
            let candidate = current.join(stripped);
            if candidate.is_file() && self.has_style_extension(&candidate) {
                return Some(candidate);
            }
            if is_project_root(current, &self.config.root_markers) {
                crate::debug!("style"; "`{}` not found below {}", reference, current.display());
                return None;
            }
            current = current.parent()?;
        }
    }

    /// Reload the stylesheet at `path` and return the text now in effect.
    ///
    /// On a read failure the prior cached text is returned unchanged.
    pub fn load(&self, path: &Path) -> Option<String> {
        match read_stylesheet(path) {
            Ok(text) => {
                self.cache.insert(path.to_path_buf(), text.clone());
                Some(text)
            }
            Err(e) => {
                crate::log!("style"; "{}: {}", e, source_message(&e));
                self.cached(path)
            }
        }
    }

    /// Last successfully loaded text for `path`.
    pub fn cached(&self, path: &Path) -> Option<String> {
        self.cache.get(path).map(|entry| entry.value().clone())
    }

    fn has_style_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.extension))
    }
}

fn read_stylesheet(path: &Path) -> Result<String, StyleError> {
    std::fs::read_to_string(path).map_err(|e| StyleError::Io(path.to_path_buf(), e))
}

fn source_message(e: &StyleError) -> String {
    match e {
        StyleError::Io(_, io) => io.to_string(),
    }
}

// ============================================================================
// Project root detection
// ============================================================================

/// Check whether `dir` contains any of the project-root `markers`.
///
/// A marker is either an exact file name or a `*.ext` pattern.
pub fn is_project_root(dir: &Path, markers: &[String]) -> bool {
    markers.iter().any(|marker| match marker.strip_prefix("*.") {
        Some(ext) => std::fs::read_dir(dir).is_ok_and(|entries| {
            entries.filter_map(Result::ok).any(|entry| {
                entry.path().is_file()
                    && entry
                        .path()
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
            })
        }),
        None => dir.join(marker).is_file(),
    })
}

/// Walk upward from `start` to the nearest directory carrying a root marker.
pub fn find_project_root(start: &Path, markers: &[String]) -> Option<PathBuf> {
    let mut current = start;
    loop {
        if is_project_root(current, markers) {
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
}
