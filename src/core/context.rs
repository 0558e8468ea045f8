//! Conversational memory sent along with each question
//!
//! The remote service is stateless, so every request carries the earlier
//! turns folded into one prompt.

use crate::conversation::{Message, Sender};

/// Per-sender concatenation of the transcript
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextFolds {
    pub user: String,
    pub assistant: String,
}

impl ContextFolds {
    pub fn from_transcript(transcript: &[Message]) -> Self {
        Self {
            user: fold(transcript, Sender::User),
            assistant: fold(transcript, Sender::Assistant),
        }
    }
}

/// Each message from `sender`, in transcript order, prefixed by a newline
fn fold(transcript: &[Message], sender: Sender) -> String {
    transcript
        .iter()
        .filter(|m| m.from == sender)
        .fold(String::new(), |mut acc, m| {
            acc.push('\n');
            acc.push_str(&m.text);
            acc
        })
}

/// Frame `question` with the folded conversation
pub fn compose_prompt(folds: &ContextFolds, question: &str) -> String {
    format!(
        "Using this as context only:\n\
         My previous messages:\n{}\n\
         Your previous responses:\n{}\n\
         Primarily answer this question:\n{}",
        folds.user, folds.assistant, question
    )
}
