//! # llm-docgen
//!
//! Walks source trees and asks a hosted model to document every file.
//!
//! ## Features
//!
//! - Conversation history persisted per role, with timestamped archives
//! - Fixed retry table with per-failure-class backoff
//! - Glob, directory, regex and literal-path filtering
//! - Localized prompts rendered through Tera templates
//! - Atomic writes of the generated documents
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_docgen::{CodeAssistant, Config, GeminiClient, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load("code_assistant.json")?.for_language("en");
//! let model = Arc::new(GeminiClient::new("api-key", config.model_name.clone()));
//!
//! let mut assistant =
//!     CodeAssistant::new(&config, "doc_writer", "en", model, Arc::new(SystemClock))?;
//! let stats = assistant.process_files(&config.start_dirs).await;
//! println!("{} files documented", stats.processed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **Walker**: enumerates files that pass the [`FileFilter`]
//! 2. **RequestBuilder**: turns a file into a localized prompt
//! 3. **ChatClient**: sends it as the next turn of a stored conversation
//! 4. **ArtifactWriter**: writes the answer under `<docs_dir>/<role>/`
//!
//! [`Runner`] repeats this for every configured language and role.

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod assistant;
mod chat;
mod clock;
mod config;
mod error;
mod file;
mod filter;
mod gemini;
mod history;
mod instructions;
mod model;
mod request;
mod retry;
mod runner;
mod template;
mod translations;
mod walker;
mod writer;

pub use assistant::{CodeAssistant, ProcessStats, strip_response_prefixes};
pub use chat::{ChatClient, DEFAULT_ASK_ATTEMPTS, clean_response};
pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigBuilder, ConfigProvider, JsonConfigProvider, StaticConfigProvider};
pub use error::{Error, Result};
pub use file::{FileTask, read_task};
pub use filter::FileFilter;
pub use gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiClient, MAX_UPLOAD_ATTEMPTS, UploadedFile};
pub use history::{DialogueLog, HistoryFlag, HistoryStore, Role, Turn};
pub use instructions::Instructions;
pub use model::{ChatModel, Content, ErrorKind, GenerateRequest, ModelError, Part};
pub use request::{PromptRequest, RequestBuilder, relative_from_anchor};
pub use retry::{AttemptCap, Backoff, RetryDecision, RetryPolicy, RetryRule};
pub use runner::{GeminiFactory, ModelFactory, Runner, Selection};
pub use template::PromptTemplate;
pub use translations::{DEFAULT_FILE_LOCATION, DEFAULT_ROLE_DESCRIPTION, Translations};
pub use walker::Walker;
pub use writer::{ArtifactWriter, common_base};
