//! Bounded filesystem traversal for configured paths.
//!
//! Depth is capped by `index.max_depth`. When symlinks are followed, walkdir's
//! own loop detection is backed by a set of visited canonical directories, so
//! a link pointing back up the tree is entered at most once.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IndexConfig;

/// A regular file found under a root.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub size: u64,
    pub modified: i64,
}

/// Walks `root` (a directory or a single file) and returns every regular
/// file, sorted by relative path.
pub fn walk_location(root: &Path, config: &IndexConfig) -> Result<Vec<WalkedFile>> {
    let exclude_set = build_excludes(&config.exclude_globs)?;
    let mut files = Vec::new();
    let mut visited_dirs: HashSet<PathBuf> = HashSet::new();

    let mut walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .max_depth(config.max_depth)
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = if relative.as_os_str().is_empty() {
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        } else {
            relative.to_string_lossy().replace('\\', "/")
        };

        if entry.file_type().is_dir() {
            if config.follow_symlinks {
                let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
                if !visited_dirs.insert(canonical) {
                    walker.skip_current_dir();
                    continue;
                }
            }
            if entry.depth() > 0 && exclude_set.is_match(format!("{}/", rel_str)) {
                walker.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() || exclude_set.is_match(&rel_str) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping file without metadata");
                continue;
            }
        };
        let modified = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        files.push(WalkedFile {
            abs_path: path.to_path_buf(),
            rel_path: rel_str,
            size: metadata.len(),
            modified,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn build_excludes(extra: &[String]) -> Result<GlobSet> {
    let mut patterns = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.DS_Store".to_string(),
    ];
    patterns.extend(extra.iter().cloned());

    let mut builder = GlobSetBuilder::new();
    for pattern in &patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_nested_files_and_skips_excludes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("q1/deep")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join("a.csv"), "x").unwrap();
        fs::write(root.join("q1/deep/b.txt"), "yy").unwrap();
        fs::write(root.join(".git/objects/blob"), "zzz").unwrap();

        let files = walk_location(root, &IndexConfig::default()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["a.csv", "q1/deep/b.txt"]);
        assert_eq!(files[1].size, 2);
    }

    #[test]
    fn respects_max_depth() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("1/2/3")).unwrap();
        fs::write(root.join("top.txt"), "x").unwrap();
        fs::write(root.join("1/2/3/deep.txt"), "x").unwrap();

        let cfg = IndexConfig {
            max_depth: 2,
            ..IndexConfig::default()
        };
        let files = walk_location(root, &cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "top.txt");
    }

    #[test]
    fn single_file_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("master.csv");
        fs::write(&file, "a,b\n").unwrap();
        let files = walk_location(&file, &IndexConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "master.csv");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_terminates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/data.txt"), "x").unwrap();
        std::os::unix::fs::symlink(root, root.join("sub/loop")).unwrap();

        let cfg = IndexConfig {
            follow_symlinks: true,
            ..IndexConfig::default()
        };
        let files = walk_location(root, &cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "sub/data.txt");
    }
}
