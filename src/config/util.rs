//! Configuration utility functions.

use std::path::{Path, PathBuf};

/// Find config file by searching upward from `start`
///
/// Walks up parent directories until finding `config_name`.
/// Returns the absolute path to the config file if found
///
/// # Example
/// ```text
/// /home/user/app/Views/Pages/   ← start
/// /home/user/app/hotview.toml   ← found!
/// ```
pub fn find_config_file(config_name: &Path, start: &Path) -> Option<PathBuf> {
    if config_name.is_absolute() {
        return config_name.exists().then(|| config_name.to_path_buf());
    }

    let mut current = start;
    loop {
        let candidate = current.join(config_name);
        if candidate.is_file() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None, // Reached filesystem root
        }
    }
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_in_ancestor() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("Views/Pages");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("hotview.toml"), "").unwrap();

        let found = find_config_file(Path::new("hotview.toml"), &nested).unwrap();
        assert_eq!(found, temp.path().join("hotview.toml"));
    }

    #[test]
    fn test_find_config_absolute_missing() {
        let temp = TempDir::new().unwrap();
        let absent = temp.path().join("absent.toml");
        assert_eq!(find_config_file(&absent, temp.path()), None);
    }
}
