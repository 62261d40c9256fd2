//! Conversation session with a hosted model.

use crate::{
    clock::Clock,
    error::Result,
    history::{DialogueLog, HistoryFlag, HistoryStore, Role, Turn},
    model::{ChatModel, Content, ErrorKind, GenerateRequest, Part},
    retry::{RetryDecision, RetryPolicy},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Attempts used by [`ChatClient::ask`] when the caller has no preference.
pub const DEFAULT_ASK_ATTEMPTS: u32 = 15;

static HTML_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```html.*?```").expect("html block regex is valid"));

/// Turns escaped control sequences into the characters they stand for and
/// removes fenced `html` blocks.
#[must_use]
pub fn clean_response(text: &str) -> String {
    let unescaped = text
        .replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r");
    HTML_BLOCK.replace_all(&unescaped, "").into_owned()
}

/// One conversation session.
///
/// The client owns the in-memory turns of the conversation it is currently
/// attached to, and composes the stateless [`ChatModel`] transport with the
/// [`HistoryStore`] persistence.
pub struct ChatClient {
    model: Arc<dyn ChatModel>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    system_instruction: Option<String>,
    chat_attempts: u32,
    dialogue_log: Option<DialogueLog>,
    history: Vec<Turn>,
}

impl ChatClient {
    /// Creates a client with the standard retry table and single-attempt
    /// chat turns.
    #[must_use]
    pub fn new(model: Arc<dyn ChatModel>, clock: Arc<dyn Clock>) -> Self {
        Self {
            model,
            clock,
            policy: RetryPolicy::standard(),
            system_instruction: None,
            chat_attempts: 1,
            dialogue_log: None,
            history: Vec::new(),
        }
    }

    /// Sets the instruction sent with every request.
    #[must_use]
    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.system_instruction = (!instruction.trim().is_empty()).then_some(instruction);
        self
    }

    /// Sets how many attempts a single chat turn may take.
    #[must_use]
    pub fn chat_attempts(mut self, attempts: u32) -> Self {
        self.chat_attempts = attempts.max(1);
        self
    }

    /// Records every successful [`ask`](Self::ask) exchange in `log`.
    #[must_use]
    pub fn dialogue_log(mut self, log: DialogueLog) -> Self {
        self.dialogue_log = Some(log);
        self
    }

    /// Turns currently held in memory.
    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Sends a stateless prompt, retrying per the retry table.
    ///
    /// Returns the cleaned reply, or `None` once attempts are exhausted or a
    /// non-retryable failure occurs.
    pub async fn ask(&self, prompt: &str, max_attempts: u32) -> Option<String> {
        let request = GenerateRequest::prompt(self.system_instruction.clone(), prompt);
        let reply = self.send(&request, max_attempts).await?;

        if let Some(log) = &self.dialogue_log {
            if let Err(e) = log.append(&[Turn::user(prompt), Turn::model(reply.as_str())]) {
                warn!("Failed to record dialogue: {}", e);
            }
        }
        Some(reply)
    }

    /// Sends a prompt as the next turn of the conversation stored under
    /// `history_key`.
    ///
    /// `flag` is applied before sending. If it cannot be applied nothing is
    /// sent, the in-memory turns are dropped and the stored files are left
    /// as they were. Otherwise the history is persisted after the call
    /// whether or not the model answered.
    pub async fn chat(
        &mut self,
        prompt: &str,
        history_key: &Path,
        flag: HistoryFlag,
    ) -> Option<String> {
        let store = HistoryStore::open(history_key);
        if let Err(e) = self.apply_flag(&store, flag) {
            error!("Failed to apply history flag {}: {}", flag.as_str(), e);
            self.history.clear();
            return None;
        }

        let request = GenerateRequest::conversation(
            self.system_instruction.clone(),
            &self.history,
            prompt,
        );
        let reply = self.send(&request, self.chat_attempts).await;

        match &reply {
            Some(text) => {
                self.history.push(Turn::user(prompt));
                self.history.push(Turn::model(text.as_str()));
            }
            None => error!("Chat turn failed for {}", history_key.display()),
        }

        if let Err(e) = store.save(&self.history) {
            error!("Failed to save chat history: {}", e);
        }
        reply
    }

    /// Drops the in-memory turns and deletes the stored history for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored file cannot be removed.
    pub fn clear_history(&mut self, history_key: &Path) -> Result<()> {
        self.history.clear();
        HistoryStore::open(history_key).clear()
    }

    /// Asks the model to describe an inline image.
    pub async fn describe_image(
        &self,
        image: Vec<u8>,
        mime_type: &str,
        prompt: &str,
    ) -> Option<String> {
        let mut parts = Vec::with_capacity(2);
        if !prompt.is_empty() {
            parts.push(Part::Text(prompt.to_string()));
        }
        parts.push(Part::InlineData {
            mime_type: mime_type.to_string(),
            data: image,
        });

        let request = GenerateRequest {
            system_instruction: self.system_instruction.clone(),
            contents: vec![Content {
                role: Role::User,
                parts,
            }],
        };
        self.send(&request, 1).await
    }

    fn apply_flag(&mut self, store: &HistoryStore, flag: HistoryFlag) -> Result<()> {
        if flag.loads() {
            self.history = store.load()?;
        }

        match flag {
            HistoryFlag::SaveChat => {}
            HistoryFlag::ReadAndClear => self.history.clear(),
            HistoryFlag::Clear => {
                self.history.clear();
                store.clear()?;
            }
            HistoryFlag::ReadAndStartNew | HistoryFlag::StartNew => {
                if let Some(archive) = store.archive(&self.history, self.clock.now())? {
                    debug!("Started a new conversation, previous one in {}", archive.display());
                }
                self.history.clear();
            }
        }
        Ok(())
    }

    async fn send(&self, request: &GenerateRequest, max_attempts: u32) -> Option<String> {
        for attempt in 0..max_attempts {
            let kind = match self.model.generate(request).await {
                Ok(text) if !text.trim().is_empty() => return Some(clean_response(&text)),
                Ok(_) => {
                    debug!(attempt, "No response from the model");
                    ErrorKind::EmptyResponse
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Model request failed");
                    e.kind()
                }
            };

            match self.policy.decide(kind, attempt, max_attempts) {
                RetryDecision::Retry(delay) => {
                    debug!(attempt, delay_secs = delay.as_secs(), ?kind, "Backing off");
                    self.clock.sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    error!(attempt, ?kind, "Giving up on model request");
                    return None;
                }
            }
        }
        None
    }
}
