//! # Stream Supervisor
//!
//! Push-mode counterpart of the schedule engine. Opens one subscription per
//! registered query, runs a consumer task for each, and keeps every open
//! subscription in a live set so shutdown can close them all.
//!
//! The reconnect flag is the only state shared with the connections: it
//! starts `true` and is cleared exactly once, by `stop`. Each connection reads
//! it when it drops and asks whether to reconnect.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{StreamCloser, Subscription};
use crate::coordinator::{RetrievalCoordinator, StreamContext};
use crate::error::{InputError, Result};
use crate::logging::log_stream_operation;
use crate::registry::QuerySpec;
use crate::schedule::engine::wait_for_shutdown;

/// One open subscription and the task consuming it
#[derive(Debug)]
pub struct ActiveStream {
    pub subscription_id: Uuid,
    pub query_name: String,
    pub opened_at: Instant,
    closer: Arc<dyn StreamCloser>,
    consumer: JoinHandle<()>,
}

/// Result of closing the live set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseSummary {
    pub closed: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct StreamSupervisor {
    coordinator: Arc<RetrievalCoordinator>,
    reconnect: Arc<AtomicBool>,
    active: DashMap<String, ActiveStream>,
    finished: Mutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamSupervisor {
    pub fn new(coordinator: Arc<RetrievalCoordinator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            coordinator,
            reconnect: Arc::new(AtomicBool::new(true)),
            active: DashMap::new(),
            finished: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect.load(Ordering::Acquire)
    }

    /// Number of subscriptions currently in the live set
    pub fn open_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Open a subscription for every registered query
    ///
    /// A query whose subscription cannot be opened is reported as a stream
    /// failure event and skipped; the rest still open. Returns the number of
    /// subscriptions opened.
    pub async fn start(&self) -> Result<usize> {
        if self.is_stopped() {
            return Err(InputError::InvalidState(
                "stream supervisor has been stopped".to_string(),
            ));
        }

        let registry = Arc::clone(self.coordinator.registry());
        let mut opened = 0;
        for query in registry.iter() {
            if self.is_stopped() {
                break;
            }
            if self.open(Arc::clone(query)).await {
                opened += 1;
            }
        }

        info!(
            opened = opened,
            queries = registry.len(),
            "📡 SUPERVISOR: Streaming started"
        );
        Ok(opened)
    }

    async fn open(&self, query: Arc<QuerySpec>) -> bool {
        let started = Instant::now();
        let subscription = match self.coordinator.client().subscribe(&query).await {
            Ok(subscription) => subscription,
            Err(source) => {
                let error = InputError::stream(query.name.clone(), source);
                log_stream_operation(
                    "subscribe",
                    &query.name,
                    None,
                    "failed",
                    Some(&error.to_string()),
                );
                self.coordinator
                    .handle_subscribe_failure(&query, &error, started.elapsed())
                    .await;
                return false;
            }
        };

        let subscription_id = subscription.id();
        let closer = subscription.closer();
        let context = StreamContext::new(Arc::clone(&query));
        let consumer = tokio::spawn(consume(
            Arc::clone(&self.coordinator),
            context,
            subscription,
            Arc::clone(&self.reconnect),
            self.shutdown_tx.subscribe(),
        ));

        let stream = ActiveStream {
            subscription_id,
            query_name: query.name.clone(),
            opened_at: started,
            closer,
            consumer,
        };
        self.active.insert(query.name.clone(), stream);

        // stop() may have drained the set while this subscription was opening
        if self.is_stopped() {
            if let Some((_, stream)) = self.active.remove(&query.name) {
                self.close_stream(stream);
            }
            return false;
        }

        let id = subscription_id.to_string();
        log_stream_operation("subscribe", &query.name, Some(&id), "open", None);
        true
    }

    /// Clear the reconnect flag so dropped connections stay down
    pub fn disable_reconnect(&self) {
        if self.reconnect.swap(false, Ordering::AcqRel) {
            debug!("📡 SUPERVISOR: Reconnect disabled");
        }
    }

    /// Close every subscription in the live set, best-effort, and clear it
    pub fn close_all(&self) -> CloseSummary {
        self.stopping.store(true, Ordering::Release);

        let names: Vec<String> = self.active.iter().map(|entry| entry.key().clone()).collect();
        let mut summary = CloseSummary::default();
        for name in names {
            if let Some((_, stream)) = self.active.remove(&name) {
                if self.close_stream(stream) {
                    summary.closed += 1;
                } else {
                    summary.failed += 1;
                }
            }
        }
        // Consumers and join() wake only once every handle has been collected
        self.shutdown_tx.send_replace(true);

        info!(
            closed = summary.closed,
            failed = summary.failed,
            "📡 SUPERVISOR: Subscriptions closed"
        );
        summary
    }

    fn close_stream(&self, stream: ActiveStream) -> bool {
        let closed = match stream.closer.close() {
            Ok(()) => {
                let id = stream.subscription_id.to_string();
                log_stream_operation("close", &stream.query_name, Some(&id), "closed", None);
                true
            }
            Err(e) => {
                warn!(
                    query = %stream.query_name,
                    subscription_id = %stream.subscription_id,
                    error = %e,
                    "📡 SUPERVISOR: Failed to close subscription"
                );
                false
            }
        };
        self.finished.lock().push(stream.consumer);
        closed
    }

    /// Disable reconnects and close every subscription
    pub fn stop(&self) -> CloseSummary {
        self.disable_reconnect();
        self.close_all()
    }

    /// Block until stopped, then wait for the consumer tasks to finish
    pub async fn join(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        wait_for_shutdown(&mut shutdown_rx).await;

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.finished.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "📡 SUPERVISOR: Consumer terminated abnormally");
            }
        }
        debug!("📡 SUPERVISOR: Consumers joined");
    }
}

async fn consume(
    coordinator: Arc<RetrievalCoordinator>,
    context: StreamContext,
    mut subscription: Subscription,
    reconnect: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            message = subscription.recv() => message,
            _ = wait_for_shutdown(&mut shutdown_rx) => break,
        };
        let Some(message) = message else {
            break;
        };
        coordinator
            .handle_stream_message(&context, message, &reconnect)
            .await;
    }
    debug!(query = %context.query.name, "📡 SUPERVISOR: Consumer finished");
}
