use crate::error::{Error, Result};
use std::{
    ffi::OsString,
    fs,
    io::Write,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// Writes generated documents under `<docs_dir>/<role>/`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    save_as_md: bool,
}

impl ArtifactWriter {
    /// Creates a writer for one role.
    #[must_use]
    pub fn new(docs_dir: &Path, role: &str, save_as_md: bool) -> Self {
        Self {
            output_dir: docs_dir.join(role),
            save_as_md,
        }
    }

    /// Maps a source file to its output path.
    ///
    /// The path relative to `base` is mirrored under the output directory,
    /// with `.md` appended to the file name when enabled. `base` is the
    /// project directory shared by every start directory, see
    /// [`common_base`].
    #[must_use]
    pub fn output_path(&self, base: &Path, path: &Path) -> PathBuf {
        let relative = pathdiff::diff_paths(path, base)
            .filter(|p| !p.starts_with(".."))
            .or_else(|| path.file_name().map(PathBuf::from))
            .unwrap_or_else(|| path.to_path_buf());

        let mut target = self.output_dir.join(relative).into_os_string();
        if self.save_as_md {
            target.push(".md");
        }
        PathBuf::from(target)
    }

    /// Writes `content` for the source file and returns the output path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write fails.
    pub fn write(&self, base: &Path, path: &Path, content: &str) -> Result<PathBuf> {
        let target = self.output_path(base, path);
        write_atomic(&target, content)?;
        debug!(path = %target.display(), bytes = content.len(), "Wrote document");
        Ok(target)
    }
}

/// Deepest directory containing every root.
///
/// A single root is its own base. Roots with nothing in common yield an
/// empty path, which leaves source paths unchanged when mirrored.
#[must_use]
pub fn common_base(roots: &[PathBuf]) -> PathBuf {
    let Some((first, rest)) = roots.split_first() else {
        return PathBuf::new();
    };

    let mut base: Vec<Component<'_>> = first.components().collect();
    for root in rest {
        let shared = base
            .iter()
            .zip(root.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        base.truncate(shared);
    }
    base.iter().collect()
}

/// Writes a file atomically.
///
/// # Process
///
/// 1. Creates missing parent directories
/// 2. Writes content to `<name>.tmp` next to the target
/// 3. Syncs the temporary file to disk
/// 4. Atomically renames it to the target path
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let mut temp_name = path
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut temp_file = fs::File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;

    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| Error::io(&temp_path, e))?;

    temp_file
        .sync_all()
        .map_err(|e| Error::io(&temp_path, e))?;

    drop(temp_file);

    fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_output_path_mirrors_tree() {
        let writer = ArtifactWriter::new(Path::new("docs"), "doc_writer", true);
        assert_eq!(
            writer.output_path(Path::new("/src"), Path::new("/src/pkg/a.py")),
            PathBuf::from("docs/doc_writer/pkg/a.py.md")
        );
    }

    #[test]
    fn test_output_path_without_md() {
        let writer = ArtifactWriter::new(Path::new("docs"), "code_checker", false);
        assert_eq!(
            writer.output_path(Path::new("/src"), Path::new("/src/a.py")),
            PathBuf::from("docs/code_checker/a.py")
        );
    }

    #[test]
    fn test_output_path_keeps_start_dir_segment() {
        let writer = ArtifactWriter::new(Path::new("docs"), "doc_writer", true);
        let base = common_base(&[PathBuf::from("/proj/pkg1"), PathBuf::from("/proj/pkg2")]);

        assert_eq!(
            writer.output_path(&base, Path::new("/proj/pkg1/main.py")),
            PathBuf::from("docs/doc_writer/pkg1/main.py.md")
        );
        assert_eq!(
            writer.output_path(&base, Path::new("/proj/pkg2/main.py")),
            PathBuf::from("docs/doc_writer/pkg2/main.py.md")
        );
    }

    #[test]
    fn test_common_base() {
        assert_eq!(common_base(&[PathBuf::from("/proj/src")]), PathBuf::from("/proj/src"));
        assert_eq!(
            common_base(&[
                PathBuf::from("/proj/a/b"),
                PathBuf::from("/proj/a/c"),
                PathBuf::from("/proj/d"),
            ]),
            PathBuf::from("/proj")
        );
        assert_eq!(
            common_base(&[PathBuf::from("/proj/src"), PathBuf::from("/proj/src/sub")]),
            PathBuf::from("/proj/src")
        );
        assert_eq!(common_base(&[]), PathBuf::new());
    }

    #[test]
    fn test_write_creates_directories() {
        let temp = assert_fs::TempDir::new().unwrap();
        let root = temp.child("src");
        root.child("pkg/a.py").write_str("x = 1").unwrap();

        let writer = ArtifactWriter::new(&temp.path().join("docs"), "doc_writer", true);
        let target = writer
            .write(root.path(), &root.path().join("pkg/a.py"), "# a.py")
            .unwrap();

        assert_eq!(target, temp.path().join("docs/doc_writer/pkg/a.py.md"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "# a.py");
        assert!(!temp.path().join("docs/doc_writer/pkg/a.py.md.tmp").exists());
    }

    #[test]
    fn test_write_overwrites() {
        let temp = assert_fs::TempDir::new().unwrap();
        let writer = ArtifactWriter::new(temp.path(), "r", false);

        writer.write(Path::new("/s"), Path::new("/s/a.py"), "old").unwrap();
        writer.write(Path::new("/s"), Path::new("/s/a.py"), "new").unwrap();

        assert_eq!(fs::read_to_string(temp.path().join("r/a.py")).unwrap(), "new");
    }
}
