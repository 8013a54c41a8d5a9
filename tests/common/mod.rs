//! Shared helpers for the integration tests: an in-memory remote client with
//! scripted fetch results and pushable subscriptions, plus sink utilities.

#![allow(dead_code)] // Each test binary uses a different subset

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use firebase_input::client::{CloseSignal, StreamCloser, SubscriptionFeed};
use firebase_input::{
    ChannelSink, ClientError, Event, InputConfig, QuerySpec, RemoteDataClient, Subscription,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Closer that refuses to close, for exercising best-effort shutdown
#[derive(Debug)]
pub struct StuckCloser {
    signal: CloseSignal,
}

impl StreamCloser for StuckCloser {
    fn close(&self) -> Result<(), ClientError> {
        Err(ClientError::Transport("socket already torn down".to_string()))
    }

    fn is_closed(&self) -> bool {
        self.signal.is_triggered()
    }
}

/// In-memory `RemoteDataClient`
///
/// Fetch results are scripted per path; the last scripted result repeats.
/// Every subscription's producing side is kept so tests can push messages.
#[derive(Default)]
pub struct MockClient {
    fetch_results: Mutex<HashMap<String, VecDeque<Result<Value, ClientError>>>>,
    fetch_calls: Mutex<Vec<String>>,
    feeds: Mutex<HashMap<String, SubscriptionFeed>>,
    stuck_closers: Mutex<HashSet<String>>,
    subscribe_failures: Mutex<HashMap<String, ClientError>>,
    fetch_delay: Mutex<Option<Duration>>,
    shutdown_calls: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_fetch(&self, path: &str, result: Result<Value, ClientError>) {
        self.fetch_results
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }

    /// Hold every fetch for `delay` before answering
    pub fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    /// Make closing the named query's subscription fail
    pub fn fail_close(&self, query_name: &str) {
        self.stuck_closers.lock().insert(query_name.to_string());
    }

    pub fn fail_subscribe(&self, query_name: &str, error: ClientError) {
        self.subscribe_failures
            .lock()
            .insert(query_name.to_string(), error);
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().clone()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn feed(&self, query_name: &str) -> Option<SubscriptionFeed> {
        self.feeds.lock().get(query_name).cloned()
    }

    pub fn feeds(&self) -> Vec<SubscriptionFeed> {
        self.feeds.lock().values().cloned().collect()
    }

    /// Wait until `count` subscriptions have been opened
    pub async fn wait_for_subscriptions(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.feeds.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscriptions were not opened in time");
    }
}

#[async_trait]
impl RemoteDataClient for MockClient {
    async fn fetch(&self, query: &QuerySpec) -> Result<Value, ClientError> {
        self.fetch_calls.lock().push(query.path.clone());
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut results = self.fetch_results.lock();
        match results.get_mut(&query.path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("non-empty queue"),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(ClientError::Http {
                status: 404,
                body: format!("nothing scripted for {}", query.path),
            }),
        }
    }

    async fn subscribe(&self, query: &QuerySpec) -> Result<Subscription, ClientError> {
        if let Some(error) = self.subscribe_failures.lock().get(&query.name) {
            return Err(error.clone());
        }

        let (subscription, feed) = Subscription::channel(query.name.clone(), 16);
        let subscription = if self.stuck_closers.lock().contains(&query.name) {
            subscription.with_closer(Arc::new(StuckCloser {
                signal: CloseSignal::new(),
            }))
        } else {
            subscription
        };
        self.feeds.lock().insert(query.name.clone(), feed);
        Ok(subscription)
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn config(yaml: &str) -> InputConfig {
    InputConfig::from_yaml_str(yaml).expect("valid test configuration")
}

pub fn channel_sink() -> (Arc<ChannelSink>, mpsc::Receiver<Event>) {
    let (sink, receiver) = ChannelSink::new(64, Duration::from_secs(1));
    (Arc::new(sink), receiver)
}

pub async fn next_event(receiver: &mut mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("no event within timeout")
        .expect("sink channel closed")
}

/// Events arriving within `window`
pub async fn collect_for(receiver: &mut mpsc::Receiver<Event>, window: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, receiver.recv()).await {
        events.push(event);
    }
    events
}
