//! Top-level driver looping over every configured language and role.

use crate::{
    assistant::{CodeAssistant, ProcessStats},
    clock::Clock,
    config::{Config, ConfigProvider},
    error::Result,
    gemini::GeminiClient,
    model::ChatModel,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Creates the model used for one pass.
pub trait ModelFactory: Send + Sync {
    /// Builds a model for the given configuration.
    fn create(&self, config: &Config) -> Arc<dyn ChatModel>;
}

impl<F> ModelFactory for F
where
    F: Fn(&Config) -> Arc<dyn ChatModel> + Send + Sync,
{
    fn create(&self, config: &Config) -> Arc<dyn ChatModel> {
        self(config)
    }
}

/// Builds a [`GeminiClient`] for the configured model name.
#[derive(Debug, Clone)]
pub struct GeminiFactory {
    api_key: String,
    base_url: Option<String>,
}

impl GeminiFactory {
    /// Creates a factory using `api_key` for every client.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    /// Points every client at a different endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Builds the client for the model `config` names.
    #[must_use]
    pub fn client(&self, config: &Config) -> GeminiClient {
        let client = GeminiClient::new(self.api_key.clone(), config.model_name.clone());
        match &self.base_url {
            Some(url) => client.with_base_url(url.clone()),
            None => client,
        }
    }
}

impl ModelFactory for GeminiFactory {
    fn create(&self, config: &Config) -> Arc<dyn ChatModel> {
        Arc::new(self.client(config))
    }
}

/// Narrows a pass to some roles, languages or roots.
///
/// Empty lists mean "everything the configuration names".
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Roles to run
    pub roles: Vec<String>,
    /// Languages to run
    pub languages: Vec<String>,
    /// Roots replacing the configured `start_dirs`
    pub start_dirs: Vec<PathBuf>,
}

impl Selection {
    fn pick<'a, T>(chosen: &'a [T], configured: &'a [T]) -> &'a [T] {
        if chosen.is_empty() { configured } else { chosen }
    }
}

/// Runs documentation passes, reloading configuration before each one.
pub struct Runner {
    provider: Box<dyn ConfigProvider>,
    factory: Box<dyn ModelFactory>,
    clock: Arc<dyn Clock>,
    selection: Selection,
}

impl Runner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        provider: Box<dyn ConfigProvider>,
        factory: Box<dyn ModelFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            factory,
            clock,
            selection: Selection::default(),
        }
    }

    /// Restricts every pass to `selection`.
    #[must_use]
    pub fn selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Runs one pass over every (language, role) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or an
    /// assistant cannot be built, e.g. because an instruction file is
    /// missing.
    pub async fn run_once(&self) -> Result<ProcessStats> {
        self.pass().await.map(|(stats, _)| stats)
    }

    /// Runs one pass and returns its stats with the configured delay.
    #[instrument(skip_all)]
    async fn pass(&self) -> Result<(ProcessStats, Duration)> {
        let config = self.provider.load()?;
        let model = self.factory.create(&config);
        let mut total = ProcessStats::default();

        let languages = Selection::pick(&self.selection.languages, &config.languages);
        let roles = Selection::pick(&self.selection.roles, &config.roles);

        for lang in languages {
            let lang_config = config.for_language(lang);
            let start_dirs = Selection::pick(&self.selection.start_dirs, &lang_config.start_dirs);

            for role in roles {
                debug!(role = %role, lang = %lang, "Starting role");
                let mut assistant = CodeAssistant::new(
                    &lang_config,
                    role,
                    lang,
                    Arc::clone(&model),
                    Arc::clone(&self.clock),
                )?;

                let stats = assistant.process_files(start_dirs).await;
                info!(
                    role = %role,
                    lang = %lang,
                    processed = stats.processed,
                    skipped = stats.skipped,
                    failed = stats.failed,
                    "Finished role"
                );
                total.merge(&stats);
            }
        }

        Ok((total, config.file_delay()))
    }

    /// Repeats [`run_once`](Self::run_once) until an error occurs.
    ///
    /// Passes are separated by the configured file delay, so edits to the
    /// configuration file apply from the next pass on.
    ///
    /// # Errors
    ///
    /// Returns the first error a pass produces.
    pub async fn run_forever(&self) -> Result<()> {
        loop {
            let (stats, delay) = self.pass().await?;
            info!(
                processed = stats.processed,
                failed = stats.failed,
                "Iteration complete in {:.2}s",
                stats.duration.as_secs_f64()
            );
            self.clock.sleep(delay).await;
        }
    }
}
