//! Generation provider boundary.
//!
//! The engine only assembles context; prompting strategy belongs to whatever
//! implements [`GenerationProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::semantic::context::ContextPayload;
use crate::semantic::embeddings::ProviderError;
use crate::semantic::retry::RetryFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation so far, oldest turn first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub turns: Vec<Turn>,
}

impl ConversationState {
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.split_last_user().map(|(_, message)| message)
    }

    /// The latest user message and the turns that came before it.
    /// Turns after that message are left out.
    pub fn split_last_user(&self) -> Option<(&[Turn], &str)> {
        let last = self.turns.iter().rposition(|t| t.role == Role::User)?;
        Some((&self.turns[..last], self.turns[last].content.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("no generation provider configured")]
    NotConfigured,

    #[error("generation unavailable after {attempts} attempts: {source}")]
    Unavailable { attempts: u32, source: ProviderError },

    #[error("generation provider error: {0}")]
    Provider(ProviderError),
}

impl From<RetryFailure> for GenerationError {
    fn from(failure: RetryFailure) -> Self {
        if failure.last_error.is_transient() {
            GenerationError::Unavailable {
                attempts: failure.attempts,
                source: failure.last_error,
            }
        } else {
            GenerationError::Provider(failure.last_error)
        }
    }
}

/// Produces a reply from assembled context and the conversation.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(
        &self,
        context: &ContextPayload,
        conversation: &ConversationState,
    ) -> Result<String, ProviderError>;
}
