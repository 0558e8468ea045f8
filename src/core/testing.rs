//! In-memory event sources for store tests

use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{EventSource, EventStream, SseEvent, StreamError, StreamQuery};

#[derive(Debug, Clone)]
pub enum Step {
    /// Event carrying this `data` payload
    Data(String),
    /// Event with no `data` field
    Empty,
    /// Transport error mid-stream
    Fail(String),
}

impl Step {
    pub fn init(model: &str) -> Self {
        Step::Data(serde_json::json!({ "init": true, "model": model }).to_string())
    }

    pub fn token(token: &str) -> Self {
        Step::Data(serde_json::json!({ "token": token }).to_string())
    }
}

/// Replays the same script for every stream it opens and records each query
pub struct ScriptedSource {
    script: Vec<Step>,
    refuse: Option<String>,
    queries: Mutex<Vec<StreamQuery>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            refuse: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// A source whose streams never open
    pub fn refusing(body: &str) -> Self {
        Self {
            refuse: Some(body.to_string()),
            ..Self::new(vec![])
        }
    }

    pub fn queries(&self) -> Vec<StreamQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn open(&self, query: &StreamQuery) -> Result<EventStream, StreamError> {
        self.queries.lock().unwrap().push(query.clone());

        if let Some(body) = &self.refuse {
            return Err(StreamError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: body.clone(),
            });
        }

        let events: Vec<Result<SseEvent, StreamError>> = self
            .script
            .iter()
            .map(|step| match step {
                Step::Data(data) => Ok(SseEvent {
                    data: Some(data.clone()),
                    ..SseEvent::default()
                }),
                Step::Empty => Ok(SseEvent {
                    event: Some("ping".to_string()),
                    ..SseEvent::default()
                }),
                Step::Fail(reason) => Err(StreamError::Body(reason.clone())),
            })
            .collect();

        Ok(Box::pin(futures::stream::iter(events)))
    }
}
