//! Local tree enumeration
//!
//! The whole source tree is read before any remote work starts so every item
//! can be registered up front. Children are sorted by file name. Symlinks are
//! never followed.

use path_clean::PathClean;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{io_err, SyncError};

/// A regular file in the source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
}

/// A directory in the source tree with its sorted children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDir {
    pub path: PathBuf,
    pub name: String,
    pub dirs: Vec<LocalDir>,
    pub files: Vec<LocalFile>,
    /// Set when the directory itself could not be read
    pub read_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSource {
    Directory(LocalDir),
    File(LocalFile),
}

/// Enumerates a local source, skipping names that match any exclude pattern
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    exclude: Vec<Regex>,
}

impl Scanner {
    pub fn new(exclude_patterns: &[String]) -> Result<Self, regex::Error> {
        let exclude = exclude_patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { exclude })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(name))
    }

    /// Enumerate `path`, which may be a directory or a single file
    pub fn scan(&self, path: &Path) -> Result<LocalSource, SyncError> {
        let path = path.clean();
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::PathNotFound(path));
            }
            Err(e) => return Err(io_err(path, e)),
        };

        let name = source_name(&path);
        if metadata.is_file() {
            return Ok(LocalSource::File(LocalFile { path, name }));
        }

        let root = self.scan_dir(&path, name);
        if let Some(error) = &root.read_error {
            return Err(io_err(
                path,
                std::io::Error::new(std::io::ErrorKind::Other, error.clone()),
            ));
        }
        Ok(LocalSource::Directory(root))
    }

    fn scan_dir(&self, path: &Path, name: String) -> LocalDir {
        let mut dir = LocalDir {
            path: path.to_path_buf(),
            name,
            dirs: Vec::new(),
            files: Vec::new(),
            read_error: None,
        };

        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // An error without a path below us is the directory itself.
                    if e.path().map_or(true, |p| p == path) {
                        warn!("Cannot read directory {}: {}", path.display(), e);
                        dir.read_error = Some(e.to_string());
                        break;
                    }
                    warn!("Skipping unreadable entry in {}: {}", path.display(), e);
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_excluded(&name) {
                debug!("Excluded: {}", entry.path().display());
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                warn!("Skipping symlink: {}", entry.path().display());
            } else if file_type.is_dir() {
                dir.dirs.push(self.scan_dir(entry.path(), name));
            } else if file_type.is_file() {
                dir.files.push(LocalFile {
                    path: entry.into_path(),
                    name,
                });
            } else {
                debug!("Skipping special file: {}", entry.path().display());
            }
        }

        dir
    }
}

/// Remote name for the source root
fn source_name(path: &Path) -> String {
    if let Some(name) = path.file_name() {
        return name.to_string_lossy().into_owned();
    }
    std::fs::canonicalize(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use assert_matches::assert_matches;

    fn tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        temp.child("photos/b.jpg").write_str("b").unwrap();
        temp.child("photos/a.jpg").write_str("a").unwrap();
        temp.child("photos/2024/x.jpg").write_str("x").unwrap();
        temp.child("photos/.DS_Store").write_str("junk").unwrap();
        temp.child("photos/10-docs/readme.md").write_str("r").unwrap();
        temp
    }

    #[test]
    fn test_scan_sorts_and_excludes() {
        let temp = tree();
        let scanner = Scanner::new(&[r"^\.DS_Store$".to_string()]).unwrap();

        let source = scanner.scan(&temp.path().join("photos")).unwrap();
        let root = match source {
            LocalSource::Directory(root) => root,
            other => panic!("expected directory, got {other:?}"),
        };

        assert_eq!(root.name, "photos");
        let dirs: Vec<_> = root.dirs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(dirs, vec!["10-docs", "2024"]);
        let files: Vec<_> = root.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(files, vec!["a.jpg", "b.jpg"]);
        assert_eq!(root.dirs[1].files[0].name, "x.jpg");
        assert_eq!(root.dirs[0].files.len(), 1);
    }

    #[test]
    fn test_scan_single_file() {
        let temp = tree();
        let scanner = Scanner::default();
        let source = scanner.scan(&temp.path().join("photos/a.jpg")).unwrap();
        assert_matches!(source, LocalSource::File(file) if file.name == "a.jpg");
    }

    #[test]
    fn test_scan_missing_path() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        assert_matches!(
            Scanner::default().scan(&missing),
            Err(SyncError::PathNotFound(p)) if p == missing
        );
    }

    #[test]
    fn test_trailing_separator_keeps_name() {
        let temp = tree();
        let with_slash = format!("{}/photos/", temp.path().display());
        let source = Scanner::default().scan(Path::new(&with_slash)).unwrap();
        assert_matches!(source, LocalSource::Directory(root) if root.name == "photos");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let temp = tree();
        std::os::unix::fs::symlink(
            temp.path().join("photos/a.jpg"),
            temp.path().join("photos/link.jpg"),
        )
        .unwrap();
        std::os::unix::fs::symlink(
            temp.path().join("photos/2024"),
            temp.path().join("photos/linked-dir"),
        )
        .unwrap();

        let source = Scanner::default().scan(&temp.path().join("photos")).unwrap();
        let LocalSource::Directory(root) = source else {
            panic!("expected directory");
        };
        assert!(root.files.iter().all(|f| f.name != "link.jpg"));
        assert!(root.dirs.iter().all(|d| d.name != "linked-dir"));
    }
}
