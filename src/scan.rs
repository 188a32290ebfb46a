//! Source tree traversal.
//!
//! Walks an index root with `walkdir`, pruning ignored directory names
//! and keeping only files on the allow-list. Unreadable directories are
//! yielded as [`ScanEntry::Error`] so the caller can report them and keep
//! going.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexingConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    File(PathBuf),
    Error { path: PathBuf, error: String },
}

/// Traversal rules compiled from `[indexing]`.
#[derive(Debug, Clone)]
pub struct Scanner {
    ignored_dirs: HashSet<String>,
    allowed_extensions: HashSet<String>,
    allowed_file_names: HashSet<String>,
    exclude_set: GlobSet,
    follow_symlinks: bool,
}

impl Scanner {
    pub fn new(config: &IndexingConfig) -> Result<Self> {
        Ok(Self {
            ignored_dirs: config.ignored_dirs.iter().cloned().collect(),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            allowed_file_names: config.allowed_file_names.iter().cloned().collect(),
            exclude_set: build_globset(&config.exclude_globs)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Whether a file name passes the allow-list.
    pub fn is_allowed(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy(),
            None => return false,
        };
        if self.allowed_file_names.contains(name.as_ref()) {
            return true;
        }
        path.extension()
            .map(|ext| {
                self.allowed_extensions
                    .contains(&ext.to_string_lossy().to_lowercase())
            })
            .unwrap_or(false)
    }

    fn is_ignored_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && self
                .ignored_dirs
                .contains(entry.file_name().to_string_lossy().as_ref())
    }

    /// Walk `root` and return every indexable file plus per-entry errors,
    /// in file-name order.
    pub fn scan(&self, root: &Path) -> Result<Vec<ScanEntry>> {
        if !root.is_dir() {
            bail!("index root is not a directory: {}", root.display());
        }

        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_ignored_dir(entry));

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    entries.push(ScanEntry::Error {
                        path,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.exclude_set.is_match(relative) {
                continue;
            }

            if self.is_allowed(path) {
                entries.push(ScanEntry::File(path.to_path_buf()));
            }
        }

        Ok(entries)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn files(entries: &[ScanEntry], root: &Path) -> Vec<String> {
        entries
            .iter()
            .filter_map(|e| match e {
                ScanEntry::File(p) => Some(
                    p.strip_prefix(root)
                        .unwrap()
                        .to_string_lossy()
                        .replace('\\', "/"),
                ),
                ScanEntry::Error { .. } => None,
            })
            .collect()
    }

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("dist")).unwrap();
        fs::write(root.join("src/b.ts"), "let b = 2;").unwrap();
        fs::write(root.join("src/a.ts"), "let a = 1;").unwrap();
        fs::write(root.join("src/nested/mod.RS"), "fn x() {}").unwrap();
        fs::write(root.join("src/logo.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join("dist/out.js"), "x").unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("Makefile"), "all:").unwrap();
        tmp
    }

    #[test]
    fn skips_ignored_dirs_and_disallowed_files() {
        let tmp = tree();
        let scanner = Scanner::new(&IndexingConfig::default()).unwrap();
        let entries = scanner.scan(tmp.path()).unwrap();
        assert_eq!(
            files(&entries, tmp.path()),
            vec!["package.json", "src/a.ts", "src/b.ts", "src/nested/mod.RS"]
        );
    }

    #[test]
    fn exclude_globs_apply_relative_to_root() {
        let tmp = tree();
        let config = IndexingConfig {
            exclude_globs: vec!["src/nested/**".to_string()],
            ..IndexingConfig::default()
        };
        let scanner = Scanner::new(&config).unwrap();
        let entries = scanner.scan(tmp.path()).unwrap();
        assert_eq!(
            files(&entries, tmp.path()),
            vec!["package.json", "src/a.ts", "src/b.ts"]
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let scanner = Scanner::new(&IndexingConfig::default()).unwrap();
        assert!(scanner.scan(&tmp.path().join("absent")).is_err());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let config = IndexingConfig {
            exclude_globs: vec!["src/[".to_string()],
            ..IndexingConfig::default()
        };
        assert!(Scanner::new(&config).is_err());
    }
}
