use crate::error::{Error, Result};
use crate::filter::FileFilter;
use crate::gemini::DEFAULT_MODEL;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

const DEFAULT_RELATIVE_FROM: &str = "hypotez";
const DEFAULT_FILE_DELAY_SECS: u64 = 20;
const DEFAULT_CHAT_ATTEMPTS: u32 = 1;
const DEFAULT_INSTRUCTIONS_DIR: &str = "instructions";
const DEFAULT_TRANSLATIONS_FILE: &str = "translations/translations.json";
const LANG_PLACEHOLDER: &str = "<lang>";

/// Configuration for the documentation assistant.
///
/// Loaded from JSON with [`Config::load`] or assembled with
/// [`Config::builder()`]. `docs_dir` may contain a `<lang>` placeholder that
/// [`Config::for_language`] substitutes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Output languages, processed in order
    pub languages: Vec<String>,

    /// Assistant roles, processed in order for every language
    pub roles: Vec<String>,

    /// Source roots to walk
    #[serde(deserialize_with = "one_or_many", alias = "start_dir")]
    pub start_dirs: Vec<PathBuf>,

    /// Output root; `<lang>` is replaced with the current language
    pub docs_dir: PathBuf,

    /// Directory output paths are mirrored from. Defaults to the deepest
    /// directory shared by all start directories.
    pub project_root: Option<PathBuf>,

    /// Glob patterns a file name must match
    pub include_files: Vec<String>,

    /// Directory names that exclude every path containing them
    pub exclude_dirs: Vec<String>,

    /// Regular expressions matched against the start of the path
    pub exclude_file_patterns: Vec<String>,

    /// Exact paths to skip
    pub exclude_files: Vec<PathBuf>,

    /// Markers stripped from the start (and a trailing fence from the end)
    /// of model responses
    pub remove_prefixes: Vec<String>,

    /// Append `.md` to output file names
    pub save_as_md: bool,

    /// Gemini model name
    pub model_name: String,

    /// Path segment the prompt's file location starts at
    pub relative_from: String,

    /// Pause after every file sent to the model, in seconds
    pub file_delay_secs: u64,

    /// Attempts per chat turn
    pub chat_attempts: u32,

    /// Directory holding `CODE_RULES.<lang>.MD` and `<role>.<lang>.md`
    pub instructions_dir: PathBuf,

    /// Role and label translation table
    pub translations_file: PathBuf,

    /// Custom Tera template for the prompt text
    pub prompt_template: Option<PathBuf>,

    /// JSON Lines log of one-shot exchanges
    pub dialogue_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            roles: vec!["doc_writer".to_string()],
            start_dirs: Vec::new(),
            docs_dir: PathBuf::from("docs"),
            project_root: None,
            include_files: Vec::new(),
            exclude_dirs: Vec::new(),
            exclude_file_patterns: Vec::new(),
            exclude_files: Vec::new(),
            remove_prefixes: Vec::new(),
            save_as_md: true,
            model_name: DEFAULT_MODEL.to_string(),
            relative_from: DEFAULT_RELATIVE_FROM.to_string(),
            file_delay_secs: DEFAULT_FILE_DELAY_SECS,
            chat_attempts: DEFAULT_CHAT_ATTEMPTS,
            instructions_dir: PathBuf::from(DEFAULT_INSTRUCTIONS_DIR),
            translations_file: PathBuf::from(DEFAULT_TRANSLATIONS_FILE),
            prompt_template: None,
            dialogue_log: None,
        }
    }
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_docgen::Config;
    ///
    /// let config = Config::builder()
    ///     .start_dir("./src")
    ///     .include_files(vec!["*.py".to_string()])
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reads and validates a JSON configuration file.
    ///
    /// Relative paths inside the file resolve against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("Cannot parse '{}': {}", path.display(), e))
        })?;

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No language, role or start directory is configured
    /// - A glob or regex pattern does not compile
    /// - `chat_attempts` is zero
    /// - The custom prompt template does not exist
    pub fn validate(&self) -> Result<()> {
        if self.languages.is_empty() {
            return Err(Error::config("At least one language is required"));
        }

        if self.roles.is_empty() {
            return Err(Error::config("At least one role is required"));
        }

        if self.start_dirs.is_empty() {
            return Err(Error::config("At least one start directory is required"));
        }

        if self.docs_dir.as_os_str().is_empty() {
            return Err(Error::config("docs_dir must not be empty"));
        }

        if self.chat_attempts == 0 {
            return Err(Error::config("chat_attempts must be greater than 0"));
        }

        // compiles every glob and regex
        FileFilter::new(self)?;

        if let Some(ref template) = self.prompt_template {
            if !template.is_file() {
                return Err(Error::config(format!(
                    "Prompt template does not exist: {}",
                    template.display()
                )));
            }
        }

        Ok(())
    }

    /// Returns a copy with `<lang>` in `docs_dir` replaced by `lang`.
    #[must_use]
    pub fn for_language(&self, lang: &str) -> Self {
        let docs_dir = self
            .docs_dir
            .to_string_lossy()
            .replace(LANG_PLACEHOLDER, lang);
        Self {
            docs_dir: PathBuf::from(docs_dir),
            ..self.clone()
        }
    }

    /// Pause after every file sent to the model.
    #[must_use]
    pub const fn file_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.file_delay_secs)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        self.start_dirs.iter_mut().for_each(resolve);
        self.exclude_files.iter_mut().for_each(resolve);
        resolve(&mut self.docs_dir);
        resolve(&mut self.instructions_dir);
        resolve(&mut self.translations_file);
        if let Some(p) = self.project_root.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.prompt_template.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.dialogue_log.as_mut() {
            resolve(p);
        }
    }
}

/// Accepts either a single path or a list of paths.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

/// Source of configuration, consulted once per outer iteration.
pub trait ConfigProvider: Send + Sync {
    /// Returns the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be produced.
    fn load(&self) -> Result<Config>;
}

/// Re-reads a JSON file on every call.
#[derive(Debug, Clone)]
pub struct JsonConfigProvider {
    path: PathBuf,
}

impl JsonConfigProvider {
    /// Creates a provider for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigProvider for JsonConfigProvider {
    fn load(&self) -> Result<Config> {
        Config::load(&self.path)
    }
}

/// Hands out the same configuration every time.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider(pub Config);

impl ConfigProvider for StaticConfigProvider {
    fn load(&self) -> Result<Config> {
        Ok(self.0.clone())
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Option<Config>,
}

impl ConfigBuilder {
    fn config(&mut self) -> &mut Config {
        self.config.get_or_insert_with(Config::default)
    }

    /// Sets the languages to generate documentation in.
    #[must_use]
    pub fn languages(mut self, languages: Vec<String>) -> Self {
        self.config().languages = languages;
        self
    }

    /// Sets the assistant roles.
    #[must_use]
    pub fn roles(mut self, roles: Vec<String>) -> Self {
        self.config().roles = roles;
        self
    }

    /// Adds a source root to walk.
    #[must_use]
    pub fn start_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().start_dirs.push(path.into());
        self
    }

    /// Sets the output root.
    #[must_use]
    pub fn docs_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().docs_dir = path.into();
        self
    }

    /// Sets the directory output paths are mirrored from.
    #[must_use]
    pub fn project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().project_root = Some(path.into());
        self
    }

    /// Sets the include globs.
    #[must_use]
    pub fn include_files(mut self, patterns: Vec<String>) -> Self {
        self.config().include_files = patterns;
        self
    }

    /// Sets the excluded directory names.
    #[must_use]
    pub fn exclude_dirs(mut self, dirs: Vec<String>) -> Self {
        self.config().exclude_dirs = dirs;
        self
    }

    /// Sets the excluded path regexes.
    #[must_use]
    pub fn exclude_file_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config().exclude_file_patterns = patterns;
        self
    }

    /// Sets the excluded literal paths.
    #[must_use]
    pub fn exclude_files(mut self, paths: Vec<PathBuf>) -> Self {
        self.config().exclude_files = paths;
        self
    }

    /// Sets the response prefixes to strip.
    #[must_use]
    pub fn remove_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.config().remove_prefixes = prefixes;
        self
    }

    /// Enables or disables the `.md` suffix on output files.
    #[must_use]
    pub fn save_as_md(mut self, enabled: bool) -> Self {
        self.config().save_as_md = enabled;
        self
    }

    /// Sets the Gemini model name.
    #[must_use]
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config().model_name = name.into();
        self
    }

    /// Sets the anchor segment for prompt file locations.
    #[must_use]
    pub fn relative_from(mut self, segment: impl Into<String>) -> Self {
        self.config().relative_from = segment.into();
        self
    }

    /// Sets the pause after every file, in seconds.
    #[must_use]
    pub fn file_delay_secs(mut self, secs: u64) -> Self {
        self.config().file_delay_secs = secs;
        self
    }

    /// Sets the attempts per chat turn.
    #[must_use]
    pub fn chat_attempts(mut self, attempts: u32) -> Self {
        self.config().chat_attempts = attempts;
        self
    }

    /// Sets the instruction directory.
    #[must_use]
    pub fn instructions_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().instructions_dir = path.into();
        self
    }

    /// Sets the translation table file.
    #[must_use]
    pub fn translations_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().translations_file = path.into();
        self
    }

    /// Sets a custom prompt template file.
    #[must_use]
    pub fn prompt_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().prompt_template = Some(path.into());
        self
    }

    /// Sets the dialogue log file.
    #[must_use]
    pub fn dialogue_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config().dialogue_log = Some(path.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(mut self) -> Result<Config> {
        let config = std::mem::take(self.config());
        config.validate()?;
        Ok(config)
    }
}
