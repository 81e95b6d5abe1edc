#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

pub(crate) const DEFAULT_STORE_DIRNAME: &str = ".batches";

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// The store lives at the repository root so every subdirectory sees the
/// same queue.
pub(crate) fn default_storage_dir_from_start(start: &Path) -> PathBuf {
    find_repo_root(start)
        .unwrap_or_else(|| start.to_path_buf())
        .join(DEFAULT_STORE_DIRNAME)
}

pub(crate) fn default_storage_dir() -> PathBuf {
    let start = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    default_storage_dir_from_start(&start)
}
