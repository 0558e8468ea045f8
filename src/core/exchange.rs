//! Question → streamed answer exchange
//!
//! `send` records the question and an empty assistant placeholder, then hands
//! the stream to a background task that grows the placeholder as tokens
//! arrive. Failures never reach the caller: they end up in the transcript
//! and the store always returns to idle.

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::conversation::{MessageId, Phase, Sender};
use crate::transport::{SseEvent, StreamEvent, StreamQuery, StreamRecord};

use super::context::{compose_prompt, ContextFolds};
use super::store::ConversationStore;

/// Per-send flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Ask the service for a retrieval-augmented answer
    pub rag_mode: bool,
    /// Send the bare question instead of the folded conversation
    pub bypass_context: bool,
}

impl SendOptions {
    pub fn rag_mode(mut self, rag_mode: bool) -> Self {
        self.rag_mode = rag_mode;
        self
    }

    pub fn bypass_context(mut self, bypass_context: bool) -> Self {
        self.bypass_context = bypass_context;
        self
    }
}

/// How an answer stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The server closed the stream
    Completed { tokens: usize },
    /// The transport failed after the stream opened
    Interrupted { tokens: usize, reason: String },
    /// The stream never opened; the reason was appended to the answer
    SetupFailed { reason: String },
}

impl ConversationStore {
    /// Ask `question` and stream the answer into the transcript.
    ///
    /// Returns immediately, with the question and an empty answer already in
    /// the transcript. The handle resolves once the stream is over and may be
    /// dropped. `None` means no stream was started: the question was blank,
    /// another answer is streaming and the store runs with exclusive sends,
    /// or there is no tokio runtime to run the stream on. In the last case
    /// the question is recorded and the answer carries the error.
    pub fn send(&self, question: &str, options: SendOptions) -> Option<JoinHandle<ExchangeOutcome>> {
        if question.trim().is_empty() {
            return None;
        }

        let exclusive = self.shared.options.exclusive_sends;
        let accepted = self.update(|state| {
            if exclusive && state.phase == Phase::Receiving {
                return None;
            }
            state.phase = Phase::Receiving;
            Some(())
        });
        if accepted.is_none() {
            tracing::warn!("Question rejected: an answer is still streaming");
            return None;
        }

        self.append_message(Sender::User, question, options.rag_mode);
        let target_id = self.append_message(Sender::Assistant, "", options.rag_mode);

        let payload = if options.bypass_context {
            question.to_string()
        } else {
            // Folded after both appends, so the question itself is part of the context
            let folds = self.read(|state| ContextFolds::from_transcript(&state.transcript));
            compose_prompt(&folds, question)
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(message_id = %target_id, error = %err, "No async runtime to stream the answer on");
                self.append_to_message(Some(&target_id), &format!("Error: {}", err), None);
                self.set_phase(Phase::Idle);
                return None;
            }
        };

        let query = StreamQuery::new(payload, options.rag_mode);
        let store = self.clone();
        Some(runtime.spawn(async move { store.run_exchange(target_id, query).await }))
    }

    async fn run_exchange(self, target_id: MessageId, query: StreamQuery) -> ExchangeOutcome {
        tracing::info!(message_id = %target_id, rag = query.rag, "Opening answer stream");

        let mut stream = match self.shared.source.open(&query).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(message_id = %target_id, error = %err, "Answer stream failed to open");
                self.append_to_message(Some(&target_id), &format!("Error: {}", err), None);
                self.set_phase(Phase::Idle);
                return ExchangeOutcome::SetupFailed {
                    reason: err.to_string(),
                };
            }
        };

        let mut tokens = 0;
        let outcome = loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    if self.apply_event(&target_id, event) {
                        tokens += 1;
                    }
                }
                Some(Err(err)) => {
                    break ExchangeOutcome::Interrupted {
                        tokens,
                        reason: err.to_string(),
                    }
                }
                None => break ExchangeOutcome::Completed { tokens },
            }
        };

        // Dropping the stream closes the connection
        drop(stream);
        self.set_phase(Phase::Idle);

        match &outcome {
            ExchangeOutcome::Interrupted { reason, .. } => {
                tracing::warn!(message_id = %target_id, tokens, reason = %reason, "Answer stream interrupted");
            }
            _ => tracing::info!(message_id = %target_id, tokens, "Answer stream finished"),
        }
        outcome
    }

    /// Apply one event to the pending answer; true when it carried a token
    fn apply_event(&self, target_id: &MessageId, event: SseEvent) -> bool {
        let data = match event.data.as_deref() {
            Some(data) if !data.is_empty() => data,
            _ => return false,
        };

        let record = match StreamRecord::parse(data) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(message_id = %target_id, error = %err, "Skipping malformed stream event");
                return false;
            }
        };

        match record.classify() {
            StreamEvent::Init { model } => {
                tracing::debug!(message_id = %target_id, model = ?model, "Answer stream initialized");
                self.append_to_message(Some(target_id), "", model.as_deref());
                false
            }
            StreamEvent::Token(token) => {
                self.append_to_message(Some(target_id), &token, None);
                true
            }
            StreamEvent::Unrecognized => {
                tracing::debug!(message_id = %target_id, data, "Ignoring unrecognized stream event");
                false
            }
        }
    }
}
