//! Directory walking for `kbchat ingest <path>`.
//!
//! Files are matched against the `[ingest]` include and exclude globs,
//! relative to the walk root. `.git`, `target` and `node_modules` are
//! always skipped.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Path relative to the scan root, `/`-separated.
    pub relative: String,
}

/// Files to ingest under `root`, sorted by relative path. A file root is returned as-is.
pub fn scan_path(root: &Path, config: &IngestConfig) -> Result<Vec<ScannedFile>> {
    if !root.exists() {
        bail!("Path does not exist: {}", root.display());
    }
    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(vec![ScannedFile {
            path: root.to_path_buf(),
            relative: name,
        }]);
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }

        files.push(ScannedFile {
            path: path.to_path_buf(),
            relative,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
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
    use tempfile::TempDir;

    #[test]
    fn test_scan_applies_globs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("guides/drafts")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("guides/fifo.md"), "# FIFO").unwrap();
        std::fs::write(root.join("guides/drafts/wip.md"), "draft").unwrap();
        std::fs::write(root.join("notes.txt"), "notes").unwrap();
        std::fs::write(root.join("photo.png"), [0u8; 4]).unwrap();
        std::fs::write(root.join("node_modules/pkg/readme.md"), "x").unwrap();

        let config = IngestConfig {
            exclude_globs: vec!["**/drafts/**".to_string()],
            ..Default::default()
        };
        let files = scan_path(root, &config).unwrap();
        let rel: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(rel, vec!["guides/fifo.md", "notes.txt"]);

        let single = scan_path(&root.join("notes.txt"), &config).unwrap();
        assert_eq!(single[0].relative, "notes.txt");
        assert!(scan_path(&root.join("missing"), &config).is_err());
    }
}
