use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

static BINARY_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "exe", "dll", "so", "dylib", "a", "o", "obj", "png", "jpg", "jpeg", "gif", "bmp", "ico",
        "webp", "mp3", "mp4", "avi", "mkv", "mov", "wav", "flac", "pdf", "doc", "docx", "xls",
        "xlsx", "ppt", "pptx", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "wasm", "pyc",
        "class",
    ]
    .into_iter()
    .collect()
});

// leading bytes inspected for a null byte
const SNIFF_LEN: usize = 8192;

/// A source file ready to be sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    /// Path as produced by the walk
    pub path: PathBuf,

    /// Decoded text content
    pub content: String,
}

impl FileTask {
    /// Returns true if there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path.as_os_str().is_empty() || self.content.trim().is_empty()
    }
}

/// Reads a file as UTF-8 text.
///
/// # Errors
///
/// Returns [`Error::BinaryFile`] for files with a binary extension or a
/// null byte near the start, [`Error::InvalidUtf8`] for other undecodable
/// content, and [`Error::Io`] if the file cannot be read.
pub fn read_task(path: &Path) -> Result<FileTask> {
    if has_binary_extension(path) {
        return Err(Error::binary_file(path));
    }

    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    if is_likely_binary(&bytes) {
        return Err(Error::binary_file(path));
    }

    let content = String::from_utf8(bytes).map_err(|_| Error::invalid_utf8(path))?;
    Ok(FileTask {
        path: path.to_path_buf(),
        content,
    })
}

/// Checks the leading bytes for a null byte.
#[must_use]
pub(crate) fn is_likely_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SNIFF_LEN)];
    memchr::memchr(0, sample).is_some()
}

/// Checks if a file extension suggests a binary file.
#[must_use]
pub(crate) fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(ext.to_ascii_lowercase().as_str()))
}
