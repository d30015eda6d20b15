//! Workspace preparation before staging.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, TriggerError};

const GITIGNORE: &str = ".gitignore";

fn is_git_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == ".git"
}

/// Remove every `.gitignore` file under `root`, at any depth.
///
/// The `.git` directory is never entered and symlinks are not followed.
/// Returns the removed paths relative to `root`, in walk order (sorted by
/// file name at each level).
pub fn purge_gitignore_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_git_dir(e));

    for entry in walker {
        let entry = entry.map_err(|e| TriggerError::Workspace {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() || entry.file_name() != GITIGNORE {
            continue;
        }

        let path = entry.path();
        fs::remove_file(path).map_err(|source| TriggerError::Workspace {
            path: path.to_path_buf(),
            source,
        })?;

        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        debug!(path = %relative.display(), "removed .gitignore");
        removed.push(relative);
    }

    info!(
        workspace = %root.display(),
        removed = removed.len(),
        "purged .gitignore files"
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn removes_root_and_nested_gitignores() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join(".gitignore"), "build/\n");
        touch(&root.join("app/.gitignore"), "*.log\n");
        touch(&root.join("lib/deep/.gitignore"), "*.tmp\n");
        touch(&root.join("app/main.swift"), "print(1)\n");

        let removed = purge_gitignore_files(root).unwrap();

        assert_eq!(
            removed,
            vec![
                PathBuf::from(".gitignore"),
                PathBuf::from("app/.gitignore"),
                PathBuf::from("lib/deep/.gitignore"),
            ]
        );
        assert!(!root.join(".gitignore").exists());
        assert!(!root.join("app/.gitignore").exists());
        assert!(!root.join("lib/deep/.gitignore").exists());
        assert!(root.join("app/main.swift").exists());
    }

    #[test]
    fn never_enters_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join(".git/info/.gitignore"), "keep\n");

        let removed = purge_gitignore_files(root).unwrap();

        assert!(removed.is_empty());
        assert!(root.join(".git/info/.gitignore").exists());
    }

    #[test]
    fn leaves_directories_named_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("odd/.gitignore")).unwrap();

        let removed = purge_gitignore_files(root).unwrap();

        assert!(removed.is_empty());
        assert!(root.join("odd/.gitignore").is_dir());
    }

    #[test]
    fn purge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".gitignore"), "*\n");

        assert_eq!(purge_gitignore_files(dir.path()).unwrap().len(), 1);
        assert!(purge_gitignore_files(dir.path()).unwrap().is_empty());
    }
}
