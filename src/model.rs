//! Transport seam between the chat client and a hosted model.

use crate::history::{Role, Turn};
use async_trait::async_trait;
use thiserror::Error;

/// Failure class a model call ended with, as seen by the retry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The call succeeded but returned no text
    EmptyResponse,
    /// Connection, DNS or timeout failure
    Network,
    /// Gateway timeout or service unavailable
    Unavailable,
    /// Rate limit or quota exhausted
    QuotaExhausted,
    /// Missing, invalid or expired credentials
    Authentication,
    /// Request or response could not be encoded or decoded
    InvalidInput,
    /// The service rejected the request arguments
    InvalidArgument,
    /// Anything else
    Other,
}

/// Error returned by a [`ChatModel`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Transient transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with 502/503/504.
    #[error("service unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP status code
        status: u16,
        /// Error message from the service
        message: String,
    },

    /// The project ran out of quota.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Payload could not be encoded or the reply could not be decoded.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The service rejected the request as malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unclassified failure.
    #[error("unexpected model error: {0}")]
    Other(String),
}

impl ModelError {
    /// Classifies the error for the retry table.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::QuotaExhausted(_) => ErrorKind::QuotaExhausted,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}

/// One piece of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Plain text
    Text(String),
    /// Inline binary payload, e.g. an image
    InlineData {
        /// MIME type of `data`
        mime_type: String,
        /// Raw bytes
        data: Vec<u8>,
    },
}

/// A message in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Author of the message
    pub role: Role,
    /// Message parts, in order
    pub parts: Vec<Part>,
}

impl Content {
    /// Creates a single-part text message.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }
}

impl From<&Turn> for Content {
    fn from(turn: &Turn) -> Self {
        Self::text(turn.role, turn.content.clone())
    }
}

/// Everything a model needs to produce one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Standing instruction sent out of band
    pub system_instruction: Option<String>,
    /// Conversation so far, ending with the new prompt
    pub contents: Vec<Content>,
}

impl GenerateRequest {
    /// Creates a request holding a single user prompt.
    #[must_use]
    pub fn prompt(system_instruction: Option<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_instruction,
            contents: vec![Content::text(Role::User, prompt)],
        }
    }

    /// Creates a request from prior turns followed by a new user prompt.
    #[must_use]
    pub fn conversation(
        system_instruction: Option<String>,
        history: &[Turn],
        prompt: impl Into<String>,
    ) -> Self {
        let mut contents: Vec<Content> = history.iter().map(Content::from).collect();
        contents.push(Content::text(Role::User, prompt));
        Self {
            system_instruction,
            contents,
        }
    }
}

/// A hosted generative model.
///
/// Implementations perform exactly one remote call per invocation and keep
/// no conversation state; retries and history live in the chat client.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Sends the request and returns the reply text, which may be empty.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError>;
}

#[cfg(test)]
pub(crate) use scripted::ScriptedModel;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ModelError::Authentication("bad key".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            ModelError::Unavailable {
                status: 503,
                message: "overloaded".into()
            }
            .kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(ModelError::Other("boom".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_conversation_request_appends_prompt() {
        let history = vec![Turn::user("first"), Turn::model("reply")];
        let request = GenerateRequest::conversation(Some("rules".into()), &history, "second");

        assert_eq!(request.system_instruction.as_deref(), Some("rules"));
        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[1], Content::text(Role::Model, "reply"));
        assert_eq!(request.contents[2], Content::text(Role::User, "second"));
    }
}
