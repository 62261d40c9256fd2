//! Lazy enumeration of the source files under a root directory.

use crate::config::Config;
use crate::error::Result;
use crate::file::{FileTask, read_task};
use crate::filter::FileFilter;
use std::path::Path;
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Walks source roots and yields the files that pass the filter.
#[derive(Debug, Clone)]
pub struct Walker {
    filter: FileFilter,
}

impl Walker {
    /// Creates a walker from the configuration's filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob or regex does not compile.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            filter: FileFilter::new(config)?,
        })
    }

    /// Enumerates `root` depth first, entries of a directory sorted by name.
    ///
    /// Every call starts a fresh walk. Files are read as the iterator
    /// reaches them. Directory walk errors are logged and
    /// skipped; unreadable, undecodable or binary files come out as `Err`
    /// so the caller can report them and move on.
    pub fn enumerate<'a>(&'a self, root: &Path) -> impl Iterator<Item = Result<FileTask>> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Walk error: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(move |entry| self.filter.should_process(entry.path()))
            .map(|entry| {
                trace!(path = %entry.path().display(), "Reading file");
                read_task(entry.path())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_fs::prelude::*;
    use std::path::PathBuf;

    fn walker(root: &Path) -> Walker {
        let config = Config::builder()
            .start_dir(root)
            .include_files(vec!["*.py".to_string()])
            .exclude_dirs(vec!["tests".to_string()])
            .build()
            .unwrap();
        Walker::new(&config).unwrap()
    }

    #[test]
    fn test_enumerate_include_and_exclude() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.py").write_str("x = 1").unwrap();
        temp.child("b.txt").write_str("notes").unwrap();
        temp.child("tests/t.py").write_str("assert True").unwrap();
        temp.child("pkg/c.py").write_str("y = 2").unwrap();

        let w = walker(temp.path());
        let mut paths: Vec<PathBuf> = w
            .enumerate(temp.path())
            .map(|task| task.unwrap().path)
            .collect();
        paths.sort();

        assert_eq!(
            paths,
            vec![temp.path().join("a.py"), temp.path().join("pkg/c.py")]
        );
    }

    #[test]
    fn test_enumerate_sorted_by_name() {
        let temp = assert_fs::TempDir::new().unwrap();
        for name in ["c.py", "a.py", "b/z.py", "b.py"] {
            temp.child(name).write_str("x = 1").unwrap();
        }

        let w = walker(temp.path());
        let paths: Vec<PathBuf> = w
            .enumerate(temp.path())
            .map(|task| task.unwrap().path)
            .collect();

        assert_eq!(
            paths,
            vec![
                temp.path().join("a.py"),
                temp.path().join("b/z.py"),
                temp.path().join("b.py"),
                temp.path().join("c.py"),
            ]
        );
    }

    #[test]
    fn test_enumerate_is_restartable() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.py").write_str("x = 1").unwrap();

        let w = walker(temp.path());
        assert_eq!(w.enumerate(temp.path()).count(), 1);
        assert_eq!(w.enumerate(temp.path()).count(), 1);
    }

    #[test]
    fn test_undecodable_file_is_yielded_as_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("bad.py").write_binary(&[0xFF, 0xFE, b'x']).unwrap();
        temp.child("good.py").write_str("ok = True").unwrap();

        let w = walker(temp.path());
        let results: Vec<_> = w.enumerate(temp.path()).collect();

        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::InvalidUtf8 { .. }))));
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let w = walker(temp.path());
        assert_eq!(w.enumerate(&temp.path().join("missing")).count(), 0);
    }
}
