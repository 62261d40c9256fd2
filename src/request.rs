//! Prompt assembly for one source file.

use crate::error::Result;
use crate::template::PromptTemplate;
use crate::translations::Translations;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Fields of the prompt sent for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequest {
    /// Localized description of the assistant role
    pub role: String,
    /// Language the answer should be written in
    pub output_language: String,
    /// Localized "path to file" label
    pub file_location_label: String,
    /// File path starting at the anchor segment
    pub file_location: String,
    /// Role instruction text
    pub instruction: String,
    /// Source code wrapped in a code fence
    pub input_code: String,
}

impl PromptRequest {
    /// Renders the request into prompt text.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be rendered.
    pub fn render(&self, template: &PromptTemplate) -> Result<String> {
        template.render(self)
    }
}

/// Builds prompt requests for a fixed role and language.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    role_description: String,
    lang: String,
    file_location_label: String,
    instruction: String,
    anchor: String,
}

impl RequestBuilder {
    /// Resolves the localized strings for `role` and `lang` once.
    #[must_use]
    pub fn new(
        translations: &Translations,
        role: &str,
        lang: &str,
        instruction: impl Into<String>,
        anchor: impl Into<String>,
    ) -> Self {
        Self {
            role_description: translations.role_description(role, lang).to_string(),
            lang: lang.to_string(),
            file_location_label: translations.file_location(lang).to_string(),
            instruction: instruction.into(),
            anchor: anchor.into(),
        }
    }

    /// Builds the request for one file.
    #[must_use]
    pub fn build(&self, path: &Path, content: &str) -> PromptRequest {
        PromptRequest {
            role: self.role_description.clone(),
            output_language: self.lang.clone(),
            file_location_label: self.file_location_label.clone(),
            file_location: relative_from_anchor(path, &self.anchor)
                .to_string_lossy()
                .into_owned(),
            instruction: self.instruction.clone(),
            input_code: format!("```{content}```"),
        }
    }
}

/// Trims `path` so it starts at the first segment equal to `anchor`.
///
/// Returns the full path if no segment matches.
#[must_use]
pub fn relative_from_anchor(path: &Path, anchor: &str) -> PathBuf {
    let components: Vec<Component<'_>> = path.components().collect();
    components
        .iter()
        .position(|c| c.as_os_str() == anchor)
        .map_or_else(
            || path.to_path_buf(),
            |start| components[start..].iter().collect(),
        )
}
