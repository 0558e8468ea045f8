//! Server-sent event transport for the answer stream

mod http;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub use http::HttpEventSource;
pub use sse::{SseDecoder, SseEvent};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Stream body error: {0}")]
    Body(String),

    #[error("Event exceeds {limit} bytes")]
    EventTooLarge { limit: usize },
}

/// Events pushed by an open stream; `None` from the stream means the server closed it cleanly
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, StreamError>> + Send>>;

/// Query sent when opening a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamQuery {
    /// Raw question or the context-framed prompt
    pub text: String,
    pub rag: bool,
}

impl StreamQuery {
    pub fn new(text: impl Into<String>, rag: bool) -> Self {
        Self {
            text: text.into(),
            rag,
        }
    }

    /// Query parameters as sent on the wire, before URL encoding
    pub fn query_pairs(&self) -> [(&'static str, String); 2] {
        [("text", self.text.clone()), ("rag", self.rag.to_string())]
    }
}

/// Something that can open an answer stream
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, query: &StreamQuery) -> Result<EventStream, StreamError>;
}

/// Record carried in the `data` field of each event.
///
/// Fields are loosely typed: `init` counts when truthy, and scalar `model`
/// and `token` values are taken as text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamRecord {
    #[serde(default)]
    pub init: Value,
    #[serde(default)]
    pub model: Value,
    #[serde(default)]
    pub token: Value,
}

/// What a record means for the pending answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Init { model: Option<String> },
    Token(String),
    Unrecognized,
}

impl StreamRecord {
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn classify(self) -> StreamEvent {
        if is_truthy(&self.init) {
            return StreamEvent::Init {
                model: scalar_text(&self.model),
            };
        }
        match scalar_text(&self.token) {
            Some(token) => StreamEvent::Token(token),
            None => StreamEvent::Unrecognized,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_init() {
        let record = StreamRecord::parse(r#"{"init": true, "model": "llama2"}"#).unwrap();
        assert_eq!(
            record.classify(),
            StreamEvent::Init {
                model: Some("llama2".to_string())
            }
        );
    }

    #[test]
    fn test_classify_token() {
        let record = StreamRecord::parse(r#"{"token": " there"}"#).unwrap();
        assert_eq!(record.classify(), StreamEvent::Token(" there".to_string()));
    }

    #[test]
    fn test_classify_unknown_shape() {
        let record = StreamRecord::parse(r#"{"done": true}"#).unwrap();
        assert_eq!(record.classify(), StreamEvent::Unrecognized);
    }

    #[test]
    fn test_loosely_typed_records() {
        let record = StreamRecord::parse(r#"{"init": 1, "model": "m"}"#).unwrap();
        assert_eq!(
            record.classify(),
            StreamEvent::Init {
                model: Some("m".to_string())
            }
        );

        let record = StreamRecord::parse(r#"{"token": 5}"#).unwrap();
        assert_eq!(record.classify(), StreamEvent::Token("5".to_string()));

        let record = StreamRecord::parse(r#"{"init": 0, "token": "x"}"#).unwrap();
        assert_eq!(record.classify(), StreamEvent::Token("x".to_string()));

        let record = StreamRecord::parse(r#"{"init": true, "model": null}"#).unwrap();
        assert_eq!(record.classify(), StreamEvent::Init { model: None });

        let record = StreamRecord::parse(r#"{"token": {"text": "x"}}"#).unwrap();
        assert_eq!(record.classify(), StreamEvent::Unrecognized);
    }

    #[test]
    fn test_malformed_record() {
        assert!(StreamRecord::parse("not json").is_err());
    }

    #[test]
    fn test_query_pairs() {
        let query = StreamQuery::new("what is rust?", true);
        let pairs = query.query_pairs();
        assert_eq!(pairs[0], ("text", "what is rust?".to_string()));
        assert_eq!(pairs[1], ("rag", "true".to_string()));
    }
}
