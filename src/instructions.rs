use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Instruction texts for one role and language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instructions {
    /// Sent as the model's system instruction
    pub system: String,
    /// Embedded in every prompt
    pub role: String,
}

impl Instructions {
    /// Reads `CODE_RULES.<lang>.MD` and `<role>.<lang>.md` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingInstruction`] if either file cannot be read.
    pub fn load(dir: &Path, role: &str, lang: &str) -> Result<Self> {
        Ok(Self {
            system: read(&Self::system_path(dir, lang))?,
            role: read(&Self::role_path(dir, role, lang))?,
        })
    }

    /// Location of the system instruction.
    #[must_use]
    pub fn system_path(dir: &Path, lang: &str) -> PathBuf {
        dir.join(format!("CODE_RULES.{lang}.MD"))
    }

    /// Location of the role instruction.
    #[must_use]
    pub fn role_path(dir: &Path, role: &str, lang: &str) -> PathBuf {
        dir.join(format!("{role}.{lang}.md"))
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::missing_instruction(path, e))
}
