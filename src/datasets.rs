//! Local LeRobot dataset lookup.
//!
//! Recording into a repo id that already has a local directory either resumes
//! it or needs a new id. A directory without `meta/info.json` is left over
//! from an aborted recording and cannot be resumed.

use std::path::{Path, PathBuf};

pub const LEROBOT_HOME_ENV: &str = "HF_LEROBOT_HOME";

/// What is on disk for a dataset repo id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    Missing,
    /// Has `meta/info.json` and can be resumed.
    Complete,
    /// Directory exists without metadata.
    Incomplete,
}

/// Root of the local dataset cache, following LeRobot's own lookup.
pub fn lerobot_home() -> PathBuf {
    if let Some(home) = std::env::var_os(LEROBOT_HOME_ENV) {
        return PathBuf::from(home);
    }
    if let Some(hf_home) = std::env::var_os("HF_HOME") {
        return PathBuf::from(hf_home).join("lerobot");
    }
    let cache = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    cache.join("huggingface").join("lerobot")
}

pub fn dataset_dir(home: &Path, repo_id: &str) -> PathBuf {
    repo_id.split('/').fold(home.to_path_buf(), |dir, part| dir.join(part))
}

pub fn dataset_state(home: &Path, repo_id: &str) -> DatasetState {
    let dir = dataset_dir(home, repo_id);
    if !dir.is_dir() {
        DatasetState::Missing
    } else if dir.join("meta").join("info.json").is_file() {
        DatasetState::Complete
    } else {
        DatasetState::Incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dataset_states() {
        let home = TempDir::new().unwrap();
        assert_eq!(dataset_state(home.path(), "me/cubes"), DatasetState::Missing);

        let dir = dataset_dir(home.path(), "me/cubes");
        std::fs::create_dir_all(dir.join("data")).unwrap();
        assert_eq!(dataset_state(home.path(), "me/cubes"), DatasetState::Incomplete);

        std::fs::create_dir_all(dir.join("meta")).unwrap();
        std::fs::write(dir.join("meta").join("info.json"), "{}").unwrap();
        assert_eq!(dataset_state(home.path(), "me/cubes"), DatasetState::Complete);
    }

    #[test]
    fn test_dataset_dir_nests_owner() {
        let dir = dataset_dir(Path::new("/cache"), "local/so101_dataset");
        assert_eq!(dir, Path::new("/cache/local/so101_dataset"));
    }
}
