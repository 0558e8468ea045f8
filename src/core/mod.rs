//! Conversation store and streaming exchange
//!
//! This module contains the state container that surfaces subscribe to and
//! the logic that turns a question into a streamed answer.

mod context;
mod exchange;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{compose_prompt, ContextFolds};
pub use exchange::{ExchangeOutcome, SendOptions};
pub use store::{ConversationStore, StoreOptions, Subscription};
