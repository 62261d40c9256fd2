use crate::{
    chat::ChatClient,
    clock::Clock,
    config::Config,
    error::Result,
    file::FileTask,
    history::{DialogueLog, HistoryFlag},
    instructions::Instructions,
    model::ChatModel,
    request::RequestBuilder,
    template::PromptTemplate,
    translations::Translations,
    walker::Walker,
    writer::{ArtifactWriter, common_base},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Counters for one pass over the source roots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Files documented and written
    pub processed: usize,

    /// Files skipped before reaching the model
    pub skipped: usize,

    /// Files the model did not answer for, or whose output was not written
    pub failed: usize,

    /// Wall time of the pass
    pub duration: Duration,
}

impl ProcessStats {
    /// Adds the counters of `other` to `self`.
    pub fn merge(&mut self, other: &Self) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.duration += other.duration;
    }
}

/// Documents every source file for one role and language.
///
/// Each file is sent as the next turn of a conversation kept under
/// `<docs_dir>/<role>/chat_history`, and the reply is written next to the
/// other documents of the role.
pub struct CodeAssistant {
    role: String,
    lang: String,
    chat: ChatClient,
    clock: Arc<dyn Clock>,
    walker: Walker,
    requests: RequestBuilder,
    template: PromptTemplate,
    writer: ArtifactWriter,
    project_root: Option<PathBuf>,
    history_key: PathBuf,
    remove_prefixes: Vec<String>,
    file_delay: Duration,
}

impl CodeAssistant {
    /// Creates an assistant for `role` and `lang`.
    ///
    /// `config` should already have `<lang>` substituted, see
    /// [`Config::for_language`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An instruction file is missing
    /// - The translation table or prompt template is invalid
    /// - A filter pattern does not compile
    pub fn new(
        config: &Config,
        role: &str,
        lang: &str,
        model: Arc<dyn ChatModel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let instructions = Instructions::load(&config.instructions_dir, role, lang)?;
        let translations = Translations::load(&config.translations_file)?;
        let template = PromptTemplate::load(config.prompt_template.as_deref())?;

        let mut chat = ChatClient::new(model, Arc::clone(&clock))
            .system_instruction(instructions.system)
            .chat_attempts(config.chat_attempts);
        if let Some(ref path) = config.dialogue_log {
            chat = chat.dialogue_log(DialogueLog::new(path));
        }

        Ok(Self {
            role: role.to_string(),
            lang: lang.to_string(),
            chat,
            clock,
            walker: Walker::new(config)?,
            requests: RequestBuilder::new(
                &translations,
                role,
                lang,
                instructions.role,
                config.relative_from.as_str(),
            ),
            template,
            writer: ArtifactWriter::new(&config.docs_dir, role, config.save_as_md),
            project_root: config.project_root.clone(),
            history_key: config.docs_dir.join(role).join("chat_history"),
            remove_prefixes: config.remove_prefixes.clone(),
            file_delay: config.file_delay(),
        })
    }

    /// Directory holding this role's conversation history.
    #[must_use]
    pub fn history_key(&self) -> &Path {
        &self.history_key
    }

    /// Walks every root and documents the matching files.
    ///
    /// Outputs mirror each file's path below the configured project root,
    /// or below the deepest directory shared by `start_dirs`. Files are read
    /// one at a time as the walk reaches them. Per-file problems are logged
    /// and counted; they never abort the pass.
    #[instrument(skip_all, fields(role = %self.role, lang = %self.lang))]
    pub async fn process_files(&mut self, start_dirs: &[PathBuf]) -> ProcessStats {
        let started = Instant::now();
        let mut stats = ProcessStats::default();
        let base = self
            .project_root
            .clone()
            .unwrap_or_else(|| common_base(start_dirs));

        for root in start_dirs {
            info!(root = %root.display(), "Processing directory");
            let mut flag = HistoryFlag::ReadAndStartNew;

            let walker = self.walker.clone();
            for (index, task) in walker.enumerate(root).enumerate() {
                let task = match task {
                    Ok(task) if task.is_empty() => {
                        stats.skipped += 1;
                        continue;
                    }
                    Ok(task) => task,
                    Err(e) => {
                        warn!("Skipping file: {}", e);
                        stats.skipped += 1;
                        continue;
                    }
                };

                let outcome = self.process_file(&base, &task, flag).await;
                match outcome {
                    FileOutcome::Written => {
                        stats.processed += 1;
                        info!(path = %task.path.display(), number = index + 1, "Processed file");
                    }
                    FileOutcome::NotSent | FileOutcome::NoResponse | FileOutcome::NotSaved => {
                        stats.failed += 1;
                    }
                }

                if outcome.answered() {
                    flag = HistoryFlag::SaveChat;
                }
                if outcome != FileOutcome::NotSent {
                    self.clock.sleep(self.file_delay).await;
                }
            }
        }

        stats.duration = started.elapsed();
        info!(
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Pass finished in {:.2}s",
            stats.duration.as_secs_f64()
        );
        stats
    }

    async fn process_file(
        &mut self,
        base: &Path,
        task: &FileTask,
        flag: HistoryFlag,
    ) -> FileOutcome {
        let request = self.requests.build(&task.path, &task.content);
        let prompt = match request.render(&self.template) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!(path = %task.path.display(), "Cannot build prompt: {}", e);
                return FileOutcome::NotSent;
            }
        };

        debug!(path = %task.path.display(), flag = flag.as_str(), "Sending file");
        let Some(response) = self.chat.chat(&prompt, &self.history_key, flag).await else {
            error!(path = %task.path.display(), "No response from the model");
            return FileOutcome::NoResponse;
        };

        let response = strip_response_prefixes(&response, &self.remove_prefixes);
        match self.writer.write(base, &task.path, &response) {
            Ok(_) => FileOutcome::Written,
            Err(e) => {
                error!(path = %task.path.display(), "Document was not saved: {}", e);
                FileOutcome::NotSaved
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Written,
    NotSent,
    NoResponse,
    NotSaved,
}

impl FileOutcome {
    /// The model replied, so the conversation moved forward.
    const fn answered(self) -> bool {
        matches!(self, Self::Written | Self::NotSaved)
    }
}

/// Trims the response and removes a leading marker such as ```` ```md ````.
///
/// When the trimmed response starts with one of `prefixes` (compared
/// case-insensitively), that prefix and one trailing ```` ``` ```` are
/// removed and the remainder is trimmed again.
#[must_use]
pub fn strip_response_prefixes(response: &str, prefixes: &[String]) -> String {
    let response = response.trim();

    for prefix in prefixes {
        let matches = response
            .get(..prefix.len())
            .is_some_and(|head| head.to_lowercase() == prefix.to_lowercase());
        if matches {
            let rest = &response[prefix.len()..];
            return rest.strip_suffix("```").unwrap_or(rest).trim().to_string();
        }
    }

    response.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::RecordingClock,
        history::HistoryStore,
        model::{Content, GenerateRequest, ModelError, Part, ScriptedModel},
    };
    use assert_fs::prelude::*;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    struct Fixture {
        temp: assert_fs::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = assert_fs::TempDir::new().unwrap();
            temp.child("instructions/CODE_RULES.en.MD")
                .write_str("Follow the rules.")
                .unwrap();
            temp.child("instructions/doc_writer.en.md")
                .write_str("Write documentation.")
                .unwrap();
            let root = temp.path().join("src");
            fs::create_dir_all(&root).unwrap();
            Self { temp, root }
        }

        fn config(&self) -> Config {
            Config::builder()
                .start_dir(&self.root)
                .docs_dir(self.temp.path().join("docs"))
                .instructions_dir(self.temp.path().join("instructions"))
                .translations_file(self.temp.path().join("translations.json"))
                .include_files(vec!["*.py".to_string()])
                .remove_prefixes(vec!["```markdown".to_string()])
                .build()
                .unwrap()
        }

        fn source(&self, name: &str, content: &str) {
            self.temp.child("src").child(name).write_str(content).unwrap();
        }

        fn docs(&self) -> PathBuf {
            self.temp.path().join("docs")
        }
    }

    fn assistant(
        fixture: &Fixture,
        model: &Arc<ScriptedModel>,
        clock: &Arc<RecordingClock>,
    ) -> CodeAssistant {
        CodeAssistant::new(
            &fixture.config(),
            "doc_writer",
            "en",
            model.clone(),
            clock.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_strip_response_prefixes() {
        let prefixes = vec!["```markdown".to_string(), "```md".to_string()];

        assert_eq!(
            strip_response_prefixes("  ```Markdown\n# Title\n```  ", &prefixes),
            "# Title"
        );
        assert_eq!(strip_response_prefixes("```md\ntext", &prefixes), "text");
        assert_eq!(
            strip_response_prefixes("\n# Plain\n", &prefixes),
            "# Plain"
        );
        // a short response cannot match a longer prefix
        assert_eq!(strip_response_prefixes("```", &prefixes), "```");
    }

    #[tokio::test]
    async fn test_documents_single_file() {
        let fixture = Fixture::new();
        fixture.source("a.py", "x=1");
        let model = Arc::new(ScriptedModel::replying("docs for a.py"));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = assistant(&fixture, &model, &clock);
        let stats = assistant.process_files(&[fixture.root.clone()]).await;

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
        let doc = fixture.docs().join("doc_writer/a.py.md");
        assert_eq!(fs::read_to_string(doc).unwrap(), "docs for a.py");
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(20)]);

        let request = &model.requests()[0];
        assert_eq!(request.system_instruction.as_deref(), Some("Follow the rules."));
    }

    #[tokio::test]
    async fn test_prompt_contents() {
        let fixture = Fixture::new();
        fixture.source("a.py", "x=1");
        let model = Arc::new(ScriptedModel::replying("ok"));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = assistant(&fixture, &model, &clock);
        assistant.process_files(&[fixture.root.clone()]).await;

        let request = &model.requests()[0];
        let crate::model::Part::Text(prompt) = &request.contents[0].parts[0] else {
            panic!("expected a text prompt");
        };
        assert!(prompt.contains("Write documentation."));
        assert!(prompt.contains("```x=1```"));
        assert!(prompt.contains("Path to file: "));
    }

    #[tokio::test]
    async fn test_conversation_continues_across_files() {
        let fixture = Fixture::new();
        fixture.source("a.py", "a = 1");
        fixture.source("b.py", "b = 2");
        let model = Arc::new(ScriptedModel::replying("```markdown\n# doc\n```"));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = assistant(&fixture, &model, &clock);
        let stats = assistant.process_files(&[fixture.root.clone()]).await;

        assert_eq!(stats.processed, 2);
        assert_eq!(
            fs::read_to_string(fixture.docs().join("doc_writer/b.py.md")).unwrap(),
            "# doc"
        );

        // the second file is sent after the first exchange
        let requests = model.requests();
        assert_eq!(requests[0].contents.len(), 1);
        assert_eq!(requests[1].contents.len(), 3);

        let stored = HistoryStore::open(assistant.history_key()).load().unwrap();
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn test_new_pass_archives_previous_conversation() {
        let fixture = Fixture::new();
        fixture.source("a.py", "a = 1");
        let model = Arc::new(ScriptedModel::replying("doc"));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = assistant(&fixture, &model, &clock);
        assistant.process_files(&[fixture.root.clone()]).await;
        assistant.process_files(&[fixture.root.clone()]).await;

        // the second pass starts fresh
        assert_eq!(model.requests()[1].contents.len(), 1);
        let archive = HistoryStore::open(assistant.history_key()).archive_path(clock.now());
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_failed_file_is_counted_and_waits() {
        let fixture = Fixture::new();
        fixture.source("a.py", "a = 1");
        let model = Arc::new(
            ScriptedModel::new(Vec::new())
                .with_fallback(Err(ModelError::Authentication("API key not valid".into()))),
        );
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = assistant(&fixture, &model, &clock);
        let stats = assistant.process_files(&[fixture.root.clone()]).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 0);
        assert!(!fixture.docs().join("doc_writer/a.py.md").exists());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(20)]);
    }

    #[tokio::test]
    async fn test_skipped_files_do_not_wait() {
        let fixture = Fixture::new();
        fixture.source("empty.py", "   ");
        fixture
            .temp
            .child("src/bad.py")
            .write_binary(&[0xFF, 0xFE])
            .unwrap();
        let model = Arc::new(ScriptedModel::replying("doc"));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = assistant(&fixture, &model, &clock);
        let stats = assistant.process_files(&[fixture.root.clone()]).await;

        assert_eq!(stats.skipped, 2);
        assert_eq!(model.calls(), 0);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_missing_instruction_is_fatal() {
        let fixture = Fixture::new();
        let model = Arc::new(ScriptedModel::replying("doc"));
        let clock = Arc::new(RecordingClock::new());

        let result = CodeAssistant::new(&fixture.config(), "code_checker", "en", model, clock);
        assert!(result.is_err());
    }

    #[test]
    fn test_history_key() {
        let fixture = Fixture::new();
        let assistant = assistant(
            &fixture,
            &Arc::new(ScriptedModel::replying("doc")),
            &Arc::new(RecordingClock::new()),
        );
        assert_eq!(
            assistant.history_key(),
            fixture.docs().join("doc_writer").join("chat_history")
        );
    }

    #[test]
    fn test_stats_merge() {
        let mut total = ProcessStats::default();
        total.merge(&ProcessStats {
            processed: 2,
            skipped: 1,
            failed: 1,
            duration: Duration::from_secs(3),
        });
        total.merge(&ProcessStats {
            processed: 1,
            ..ProcessStats::default()
        });
        assert_eq!(total.processed, 3);
        assert_eq!(total.skipped, 1);
        assert_eq!(total.failed, 1);
        assert_eq!(total.duration, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_start_dirs_sharing_file_names_keep_separate_docs() {
        let fixture = Fixture::new();
        fixture.temp.child("proj/pkg1/main.py").write_str("one = 1").unwrap();
        fixture.temp.child("proj/pkg2/main.py").write_str("two = 2").unwrap();
        let roots = vec![
            fixture.temp.path().join("proj/pkg1"),
            fixture.temp.path().join("proj/pkg2"),
        ];
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("doc one".into()),
            Ok("doc two".into()),
        ]));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = assistant(&fixture, &model, &clock);
        let stats = assistant.process_files(&roots).await;

        assert_eq!(stats.processed, 2);
        assert_eq!(
            fs::read_to_string(fixture.docs().join("doc_writer/pkg1/main.py.md")).unwrap(),
            "doc one"
        );
        assert_eq!(
            fs::read_to_string(fixture.docs().join("doc_writer/pkg2/main.py.md")).unwrap(),
            "doc two"
        );
    }

    #[tokio::test]
    async fn test_project_root_sets_mirror_base() {
        let fixture = Fixture::new();
        fixture.source("pkg/a.py", "a = 1");
        let mut config = fixture.config();
        config.project_root = Some(fixture.temp.path().to_path_buf());
        let model = Arc::new(ScriptedModel::replying("doc"));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant =
            CodeAssistant::new(&config, "doc_writer", "en", model, clock).unwrap();
        assistant.process_files(&[fixture.root.clone()]).await;

        assert!(fixture.docs().join("doc_writer/src/pkg/a.py.md").exists());
    }

    /// Rewrites `target` while answering the first request.
    struct EditingModel {
        target: PathBuf,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for EditingModel {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> std::result::Result<String, ModelError> {
            let mut prompts = self.prompts.lock().unwrap();
            if prompts.is_empty() {
                fs::write(&self.target, "b = 'edited'").unwrap();
            }
            if let Some(Content { parts, .. }) = request.contents.last() {
                if let Some(Part::Text(text)) = parts.first() {
                    prompts.push(text.clone());
                }
            }
            Ok("doc".into())
        }
    }

    #[tokio::test]
    async fn test_files_are_read_when_reached() {
        let fixture = Fixture::new();
        fixture.source("a.py", "a = 1");
        fixture.source("b.py", "b = 'original'");
        let model = Arc::new(EditingModel {
            target: fixture.root.join("b.py"),
            prompts: Mutex::new(Vec::new()),
        });
        let clock = Arc::new(RecordingClock::new());

        let mut assistant = CodeAssistant::new(
            &fixture.config(),
            "doc_writer",
            "en",
            model.clone(),
            clock,
        )
        .unwrap();
        let stats = assistant.process_files(&[fixture.root.clone()]).await;

        assert_eq!(stats.processed, 2);
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].contains("b = 'edited'"));
        assert!(!prompts[1].contains("original"));
    }

    #[tokio::test]
    async fn test_unrenderable_prompt_fails_without_delay() {
        let fixture = Fixture::new();
        fixture.source("a.py", "a = 1");
        let template = fixture.temp.child("prompt.tera");
        template
            .write_str("{{ input_code }} {{ undefined_value }}")
            .unwrap();
        let mut config = fixture.config();
        config.prompt_template = Some(template.path().to_path_buf());
        let model = Arc::new(ScriptedModel::replying("doc"));
        let clock = Arc::new(RecordingClock::new());

        let mut assistant =
            CodeAssistant::new(&config, "doc_writer", "en", model.clone(), clock.clone())
                .unwrap();
        let stats = assistant.process_files(&[fixture.root.clone()]).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 0);
        assert_eq!(model.calls(), 0);
        assert!(clock.sleeps().is_empty());
        assert!(!fixture.docs().join("doc_writer/a.py.md").exists());
    }
}
