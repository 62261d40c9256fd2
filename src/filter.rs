//! Path filtering for the source walk.
//!
//! A file is processed when its name matches an include glob and none of
//! the exclusion rules apply.

use crate::config::Config;
use crate::error::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Compiled include and exclude rules.
#[derive(Debug, Clone)]
pub struct FileFilter {
    include_files: GlobSet,
    exclude_dirs: HashSet<OsString>,
    exclude_patterns: Vec<Regex>,
    exclude_files: HashSet<PathBuf>,
}

impl FileFilter {
    /// Compiles the filter rules from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if a glob or regex does not compile.
    pub fn new(config: &Config) -> Result<Self> {
        let include_files = Self::build_globset(&config.include_files)?;

        let exclude_patterns = config
            .exclude_file_patterns
            .iter()
            .map(|pattern| {
                // anchored like a prefix match on the path string
                Regex::new(&format!("^(?:{pattern})"))
                    .map_err(|e| Error::invalid_pattern(pattern, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            include_files,
            exclude_dirs: config.exclude_dirs.iter().map(OsString::from).collect(),
            exclude_patterns,
            exclude_files: config.exclude_files.iter().cloned().collect(),
        })
    }

    fn build_globset(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let glob =
                Glob::new(pattern).map_err(|e| Error::invalid_pattern(pattern, e.to_string()))?;
            builder.add(glob);
        }

        builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build glob set: {e}")))
    }

    /// Returns true if the file at `path` should be sent to the model.
    #[must_use]
    pub fn should_process(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };

        if !self.include_files.is_match(name) {
            return false;
        }

        if path
            .components()
            .any(|c| self.exclude_dirs.contains(c.as_os_str()))
        {
            return false;
        }

        let path_str = path.to_string_lossy();
        if self.exclude_patterns.iter().any(|re| re.is_match(&path_str)) {
            return false;
        }

        !self.exclude_files.contains(path)
    }
}
