//! Stream Chat - client-side conversation store
//!
//! Keeps a running chat transcript and fills in each answer as tokens
//! arrive from a server-sent event stream. Surfaces subscribe to the
//! [`ConversationStore`] and render the snapshots it publishes.

pub mod config;
pub mod conversation;
pub mod core;
pub mod transport;

pub use config::{Config, ConfigError};
pub use conversation::{ConversationState, Message, MessageId, Phase, Sender};
pub use crate::core::{ConversationStore, ExchangeOutcome, SendOptions, StoreOptions, Subscription};
pub use transport::{EventSource, HttpEventSource, StreamError, StreamQuery};
