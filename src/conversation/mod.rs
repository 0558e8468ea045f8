//! Conversation types and state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// A single turn in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: Sender,
    pub text: String,
    /// Whether this turn asked for retrieval-augmented answers
    pub rag_mode: bool,
    /// Backend model that produced the answer, known after the stream's init event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(from: Sender, text: impl Into<String>, rag_mode: bool) -> Self {
        Self {
            id: MessageId::new(),
            from,
            text: text.into(),
            rag_mode,
            model: None,
            created_at: Utc::now(),
        }
    }
}

/// Top-level mode of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Receiving,
}

impl Phase {
    pub const IDLE: &'static str = "idle";
    pub const RECEIVING: &'static str = "receiving";

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => Self::IDLE,
            Phase::Receiving => Self::RECEIVING,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published to subscribers on every change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub phase: Phase,
    pub transcript: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.transcript.iter().find(|m| &m.id == id)
    }

    pub(crate) fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.transcript.iter_mut().find(|m| &m.id == id)
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }
}
