use crate::error::{Error, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "prompt";

/// Maximum template file size (1MB)
const MAX_TEMPLATE_SIZE: u64 = 1024 * 1024;

/// Variables a custom prompt template must reference
const REQUIRED_VARIABLES: &[&str] = &["input_code"];

/// Variables available to every prompt template
const OPTIONAL_VARIABLES: &[&str] = &[
    "role",
    "output_language",
    "file_location_label",
    "file_location",
    "instruction",
];

/// Tera template that turns a prompt request into the text sent to the model.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    tera: Tera,
}

impl PromptTemplate {
    /// The template shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in template fails to compile.
    pub fn builtin() -> Result<Self> {
        Self::from_source(include_str!("../templates/prompt.tera"))
    }

    /// Loads the custom template at `path`, or the built-in one.
    ///
    /// # Errors
    ///
    /// Returns an error if the custom template is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(Self::builtin, Self::from_file)
    }

    /// Loads and validates a custom template file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File doesn't exist or can't be read
    /// - File is too large or empty
    /// - Template has syntax errors
    /// - Template never references the source code
    pub fn from_file(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
        if metadata.len() > MAX_TEMPLATE_SIZE {
            return Err(Error::config(format!(
                "Template file too large: {} bytes (max: {} bytes)",
                metadata.len(),
                MAX_TEMPLATE_SIZE
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        if content.trim().is_empty() {
            return Err(Error::config(format!(
                "Template file is empty: {}",
                path.display()
            )));
        }

        Self::check_required_variables(&content, path)?;
        Self::check_optional_variables(&content);

        Self::from_source(&content)
    }

    fn from_source(source: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source)
            .map_err(|e| Error::template(TEMPLATE_NAME, &e))?;
        Ok(Self { tera })
    }

    /// Renders the template with the fields of `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if the template references an unknown variable.
    pub fn render(&self, context: &impl Serialize) -> Result<String> {
        let context =
            Context::from_serialize(context).map_err(|e| Error::template(TEMPLATE_NAME, &e))?;
        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| Error::template(TEMPLATE_NAME, &e))
    }

    fn references(content: &str, var: &str) -> bool {
        [
            format!("{{{{ {var}"),
            format!("{{{{{var}"),
            format!("in {var}"),
            format!("if {var}"),
        ]
        .iter()
        .any(|pattern| content.contains(pattern))
    }

    fn check_required_variables(content: &str, path: &Path) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_VARIABLES
            .iter()
            .filter(|var| !Self::references(content, var))
            .copied()
            .collect();

        if !missing.is_empty() {
            return Err(Error::config(format!(
                "Template '{}' may be missing required variables: {}",
                path.display(),
                missing.join(", ")
            )));
        }

        Ok(())
    }

    fn check_optional_variables(content: &str) {
        for var in OPTIONAL_VARIABLES {
            if !Self::references(content, var) {
                tracing::debug!("Template does not use optional variable: {}", var);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[derive(Serialize)]
    struct Ctx {
        input_code: &'static str,
    }

    #[test]
    fn test_builtin_compiles() {
        assert!(PromptTemplate::builtin().is_ok());
    }

    #[test]
    fn test_custom_template() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("prompt.tera");
        file.write_str("CODE:\n{{ input_code }}").unwrap();

        let template = PromptTemplate::load(Some(file.path())).unwrap();
        let out = template.render(&Ctx { input_code: "x = 1" }).unwrap();
        assert_eq!(out, "CODE:\nx = 1");
    }

    #[test]
    fn test_custom_template_without_code() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("prompt.tera");
        file.write_str("{{ role }} only").unwrap();

        let err = PromptTemplate::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("input_code"));
    }

    #[test]
    fn test_syntax_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("prompt.tera");
        file.write_str("{{ input_code ").unwrap();

        assert!(matches!(
            PromptTemplate::from_file(file.path()),
            Err(Error::Template { .. })
        ));
    }

    #[test]
    fn test_empty_template() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("prompt.tera");
        file.write_str("   \n").unwrap();

        assert!(PromptTemplate::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_template_file() {
        let err = PromptTemplate::from_file(Path::new("/nonexistent/prompt.tera")).unwrap_err();
        assert!(err.is_io());
    }
}
