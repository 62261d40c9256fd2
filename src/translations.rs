//! Role and label translation table.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Used when a role has no description in the requested language.
pub const DEFAULT_ROLE_DESCRIPTION: &str =
    "Your specialization is documentation creation in the `MD` format";

/// Used when the file location label has no translation.
pub const DEFAULT_FILE_LOCATION: &str = "Path to file: ";

/// Localized strings used to build the prompt.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Translations {
    roles: HashMap<String, HashMap<String, String>>,
    file_location_translated: HashMap<String, String>,
}

impl Translations {
    /// Loads the table from a JSON file.
    ///
    /// A missing file gives an empty table, so every lookup falls back to
    /// the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Translation table not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::io(path, e)),
        };

        serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!(
                "Cannot parse translations '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Describes `role` in `lang`.
    #[must_use]
    pub fn role_description(&self, role: &str, lang: &str) -> &str {
        self.roles
            .get(role)
            .and_then(|by_lang| by_lang.get(lang))
            .map_or(DEFAULT_ROLE_DESCRIPTION, String::as_str)
    }

    /// The "path to file" label in `lang`.
    #[must_use]
    pub fn file_location(&self, lang: &str) -> &str {
        self.file_location_translated
            .get(lang)
            .map_or(DEFAULT_FILE_LOCATION, String::as_str)
    }
}
