//! HTTP event source backed by reqwest

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;

use super::sse::SseDecoder;
use super::{EventSource, EventStream, StreamError, StreamQuery};

/// Opens answer streams with a GET against a fixed endpoint
pub struct HttpEventSource {
    client: Client,
    endpoint: String,
}

impl HttpEventSource {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Result<Self, StreamError> {
        // No overall timeout: answers stream for as long as the model keeps generating
        let client = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn open(&self, query: &StreamQuery) -> Result<EventStream, StreamError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .query(&query.query_pairs())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Status { status, body });
        }

        tracing::debug!(endpoint = %self.endpoint, "Answer stream opened");

        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => match decoder.push(&chunk) {
                        Ok(events) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    },
                    Err(e) => {
                        yield Err(StreamError::Body(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::convert::Infallible;

    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::sse::{Event, Sse};
    use axum::routing::get;
    use axum::Router;
    use futures::Stream;

    use crate::conversation::{Phase, Sender};
    use crate::core::{ConversationStore, ExchangeOutcome, SendOptions};

    async fn query_stream(
        Query(params): Query<HashMap<String, String>>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let echo = format!(
            "{}|{}",
            params.get("text").cloned().unwrap_or_default(),
            params.get("rag").cloned().unwrap_or_default()
        );
        let events = vec![
            Event::default().data(r#"{"init": true, "model": "m1"}"#),
            Event::default().comment("keep-alive"),
            Event::default().data(serde_json::json!({ "token": echo }).to_string()),
        ];
        Sse::new(futures::stream::iter(events.into_iter().map(Ok)))
    }

    async fn busy() -> (StatusCode, &'static str) {
        (StatusCode::SERVICE_UNAVAILABLE, "model busy")
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/query-stream", get(query_stream))
            .route("/busy", get(busy));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn source(url: String) -> HttpEventSource {
        HttpEventSource::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_open_decodes_events_and_encodes_query() {
        let base = spawn_server().await;
        let source = source(format!("{}/query-stream", base));

        let query = StreamQuery::new("a b&c=d\nnext", true);
        let events: Vec<_> = source.open(&query).await.unwrap().collect().await;

        let data: Vec<String> = events
            .into_iter()
            .filter_map(|e| e.unwrap().data)
            .collect();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0], r#"{"init": true, "model": "m1"}"#);
        let token: serde_json::Value = serde_json::from_str(&data[1]).unwrap();
        assert_eq!(token["token"], "a b&c=d\nnext|true");
    }

    #[tokio::test]
    async fn test_error_status_is_setup_failure() {
        let base = spawn_server().await;
        let source = source(format!("{}/busy", base));

        let err = match source.open(&StreamQuery::new("hi", false)).await {
            Ok(_) => panic!("expected a status error"),
            Err(err) => err,
        };
        match &err {
            StreamError::Status { status, body } => {
                assert_eq!(*status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "model busy");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_store_streams_over_http() {
        let base = spawn_server().await;
        let store = ConversationStore::new(source(format!("{}/query-stream", base)));

        let handle = store
            .send("Hello", SendOptions::default().bypass_context(true))
            .unwrap();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Completed { tokens: 1 });

        let state = store.snapshot();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.transcript[1].from, Sender::Assistant);
        assert_eq!(state.transcript[1].text, "Hello|false");
        assert_eq!(state.transcript[1].model.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_store_reports_unreachable_endpoint() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = ConversationStore::new(source(format!("http://{}/query-stream", addr)));
        let outcome = store
            .send("Hello", SendOptions::default())
            .unwrap()
            .await
            .unwrap();
        assert!(matches!(outcome, ExchangeOutcome::SetupFailed { .. }));

        let state = store.snapshot();
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.transcript[1].text.starts_with("Error: "));
    }
}
