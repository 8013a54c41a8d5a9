//! # Remote Data Client
//!
//! The seam between the input and the remote database. `RemoteDataClient`
//! exposes single-shot fetches and server-push subscriptions; the input only
//! ever talks to the database through it, so tests substitute an in-memory
//! implementation and production uses `FirebaseRestClient`.
//!
//! A subscription delivers tagged `StreamMessage`s over a bounded channel. When
//! a connection drops, the connection task sends `Disconnected` carrying a
//! reply channel and reconnects only if the consumer answers `true`.

pub mod auth;
pub mod firebase;
pub mod sse;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::events::EventKind;
use crate::registry::QuerySpec;

pub use auth::AuthTokenCache;
pub use firebase::FirebaseRestClient;

/// Errors raised by the remote client
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Could not decode response: {0}")]
    Decode(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Stream ended: {0}")]
    StreamClosed(String),
    #[error("Stream cancelled by server: {0}")]
    Cancelled(String),
    #[error("Credential revoked by server")]
    AuthRevoked,
    #[error("Client has been shut down")]
    Closed,
}

impl ClientError {
    /// Transient failures worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout(_) | ClientError::Transport(_) => true,
            ClientError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short machine-friendly name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Timeout(_) => "timeout",
            ClientError::Transport(_) => "transport",
            ClientError::Http { .. } => "http",
            ClientError::Decode(_) => "decode",
            ClientError::InvalidRequest(_) => "invalid_request",
            ClientError::StreamClosed(_) => "stream_closed",
            ClientError::Cancelled(_) => "cancelled",
            ClientError::AuthRevoked => "auth_revoked",
            ClientError::Closed => "closed",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClientError::Timeout(error.to_string())
        } else if error.is_decode() {
            ClientError::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            ClientError::Http {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else {
            ClientError::Transport(error.to_string())
        }
    }
}

/// Access to the remote hierarchical database
#[async_trait]
pub trait RemoteDataClient: Send + Sync {
    /// Retrieve the current value at the query's path
    async fn fetch(&self, query: &QuerySpec) -> Result<Value, ClientError>;

    /// Open a persistent change subscription on the query's path
    async fn subscribe(&self, query: &QuerySpec) -> Result<Subscription, ClientError>;

    /// Release client resources and invalidate any cached credential
    async fn shutdown(&self) -> Result<(), ClientError>;
}

/// One message delivered on a subscription
#[derive(Debug)]
pub enum StreamMessage {
    /// A change notification
    Data {
        kind: EventKind,
        path: Option<String>,
        data: Value,
    },
    /// A subscription-level error; the connection stays up
    Error(ClientError),
    /// The connection dropped; answer on `reconnect` whether to reconnect
    Disconnected {
        error: ClientError,
        reconnect: oneshot::Sender<bool>,
    },
}

/// Closes the producing side of a subscription
pub trait StreamCloser: Send + Sync + fmt::Debug {
    /// Stop delivery; closing twice is a no-op
    fn close(&self) -> Result<(), ClientError>;

    fn is_closed(&self) -> bool;
}

/// Shared close flag between a subscription and its connection task
#[derive(Debug, Clone)]
pub struct CloseSignal {
    closed: Arc<AtomicBool>,
    notify: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(notify),
        }
    }

    pub fn trigger(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `trigger` has been called
    pub async fn triggered(&self) {
        let mut receiver = self.notify.subscribe();
        let _ = receiver.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCloser for CloseSignal {
    fn close(&self) -> Result<(), ClientError> {
        self.trigger();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.is_triggered()
    }
}

/// Consumer side of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    query_name: String,
    messages: mpsc::Receiver<StreamMessage>,
    closer: Arc<dyn StreamCloser>,
}

impl Subscription {
    /// Create a connected subscription/feed pair
    pub fn channel(query_name: impl Into<String>, buffer: usize) -> (Self, SubscriptionFeed) {
        let signal = CloseSignal::new();
        let (sender, messages) = mpsc::channel(buffer.max(1));
        let subscription = Self {
            id: Uuid::new_v4(),
            query_name: query_name.into(),
            messages,
            closer: Arc::new(signal.clone()),
        };
        (subscription, SubscriptionFeed { sender, signal })
    }

    /// Replace the closer, for clients with their own teardown
    pub fn with_closer(mut self, closer: Arc<dyn StreamCloser>) -> Self {
        self.closer = closer;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn closer(&self) -> Arc<dyn StreamCloser> {
        Arc::clone(&self.closer)
    }

    /// Next message; `None` once the producing side is gone
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.messages.recv().await
    }
}

/// Producer side of a subscription, owned by the connection task
#[derive(Debug, Clone)]
pub struct SubscriptionFeed {
    sender: mpsc::Sender<StreamMessage>,
    signal: CloseSignal,
}

impl SubscriptionFeed {
    pub fn is_closed(&self) -> bool {
        self.signal.is_triggered() || self.sender.is_closed()
    }

    /// Resolves when the subscription is closed or its consumer is gone
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.signal.triggered() => {}
            _ = self.sender.closed() => {}
        }
    }

    /// Deliver a message; false when the subscription is closed
    pub async fn send(&self, message: StreamMessage) -> bool {
        if self.is_closed() {
            return false;
        }
        tokio::select! {
            sent = self.sender.send(message) => sent.is_ok(),
            _ = self.signal.triggered() => false,
        }
    }

    pub async fn data(&self, kind: EventKind, path: Option<String>, data: Value) -> bool {
        self.send(StreamMessage::Data { kind, path, data }).await
    }

    pub async fn error(&self, error: ClientError) -> bool {
        self.send(StreamMessage::Error(error)).await
    }

    /// Report a dropped connection and wait for the reconnect decision
    ///
    /// Returns false when the consumer declines, is gone, or closes the
    /// subscription before answering.
    pub async fn disconnected(&self, error: ClientError) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let message = StreamMessage::Disconnected {
            error,
            reconnect: reply_tx,
        };
        if !self.send(message).await {
            return false;
        }
        tokio::select! {
            decision = reply_rx => decision.unwrap_or(false),
            _ = self.signal.triggered() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout("t".into()).is_retryable());
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(ClientError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(ClientError::Http {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!ClientError::Http {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!ClientError::Decode("bad json".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_feed_delivers_messages() {
        let (mut subscription, feed) = Subscription::channel("u", 4);

        assert!(feed.data(EventKind::Put, Some("/".into()), json!({ "v": 1 })).await);
        match subscription.recv().await {
            Some(StreamMessage::Data { kind, data, .. }) => {
                assert_eq!(kind, EventKind::Put);
                assert_eq!(data, json!({ "v": 1 }));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnected_waits_for_decision() {
        let (mut subscription, feed) = Subscription::channel("u", 4);

        let producer = tokio::spawn(async move {
            feed.disconnected(ClientError::StreamClosed("eof".into()))
                .await
        });

        match subscription.recv().await {
            Some(StreamMessage::Disconnected { reconnect, .. }) => {
                reconnect.send(true).unwrap();
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(producer.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_stops_feed() {
        let (subscription, feed) = Subscription::channel("u", 4);

        subscription.closer().close().unwrap();
        subscription.closer().close().unwrap();

        assert!(subscription.closer().is_closed());
        assert!(feed.is_closed());
        assert!(!feed.error(ClientError::Closed).await);
        feed.closed().await;
    }
}
