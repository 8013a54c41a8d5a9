//! # Retrieval Coordinator
//!
//! Turns remote outcomes into emitted events. In pull mode each schedule
//! trigger fetches every registered query once; in push mode each message
//! arriving on a subscription is dispatched by its tag. Successes go through
//! the `EventNormalizer`, failures through the `FailureReporter`, and both end
//! up at the sink. A failing query never prevents the others from running.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::client::{RemoteDataClient, StreamMessage};
use crate::error::InputError;
use crate::events::{Event, EventKind, EventNormalizer, EventSink, FailureReporter};
use crate::logging::{log_error, log_retrieval_operation};
use crate::registry::{QueryRegistry, QuerySpec};
use crate::schedule::ScheduledJob;

/// Outcome counts for one pull-mode trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullCycleSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Per-connection state carried by a push-mode consumer
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub query: Arc<QuerySpec>,
    /// When the subscription was opened; stream failures measure from here
    pub subscribed_at: Instant,
}

impl StreamContext {
    pub fn new(query: Arc<QuerySpec>) -> Self {
        Self {
            query,
            subscribed_at: Instant::now(),
        }
    }
}

pub struct RetrievalCoordinator {
    registry: Arc<QueryRegistry>,
    client: Arc<dyn RemoteDataClient>,
    normalizer: EventNormalizer,
    reporter: FailureReporter,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RetrievalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalCoordinator")
            .field("queries", &self.registry.names())
            .field("normalizer", &self.normalizer)
            .finish()
    }
}

impl RetrievalCoordinator {
    pub fn new(
        registry: Arc<QueryRegistry>,
        client: Arc<dyn RemoteDataClient>,
        normalizer: EventNormalizer,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let reporter = FailureReporter::new(normalizer.clone());
        Self {
            registry,
            client,
            normalizer,
            reporter,
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn RemoteDataClient> {
        &self.client
    }

    /// Fetch every registered query once, concurrently and independently
    #[instrument(skip(self), fields(queries = self.registry.len()))]
    pub async fn run_pull_cycle(&self) -> PullCycleSummary {
        let started = Instant::now();
        let outcomes = join_all(self.registry.iter().map(|query| self.retrieve(query))).await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let summary = PullCycleSummary {
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        };

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "📥 COORDINATOR: Pull cycle complete"
        );
        summary
    }

    /// Fetch one query and emit its event; returns whether the fetch succeeded
    pub async fn retrieve(&self, query: &QuerySpec) -> bool {
        let started = Instant::now();
        let outcome = self.client.fetch(query).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(data) => {
                log_retrieval_operation(
                    "fetch",
                    &query.name,
                    &query.path,
                    "success",
                    Some(elapsed.as_secs_f64()),
                    None,
                );
                let event = self
                    .normalizer
                    .normalize(query, EventKind::Get, data, Some(elapsed));
                self.emit(query, event).await;
                true
            }
            Err(source) => {
                let error = InputError::retrieval(query.name.clone(), source);
                log_retrieval_operation(
                    "fetch",
                    &query.name,
                    &query.path,
                    "failed",
                    Some(elapsed.as_secs_f64()),
                    Some(&error.to_string()),
                );
                self.reporter
                    .report_and_emit(self.sink.as_ref(), query, &error, elapsed)
                    .await;
                false
            }
        }
    }

    /// Dispatch one subscription message
    ///
    /// Data is emitted without timing, errors become failure events timed from
    /// the subscription's open, and disconnects are answered with the current
    /// value of `reconnect`.
    pub async fn handle_stream_message(
        &self,
        context: &StreamContext,
        message: StreamMessage,
        reconnect: &AtomicBool,
    ) {
        let query = context.query.as_ref();
        match message {
            StreamMessage::Data { kind, path, data } => {
                debug!(
                    query = %query.name,
                    kind = %kind,
                    path = ?path,
                    "📡 COORDINATOR: Stream change received"
                );
                let event = self
                    .normalizer
                    .normalize_at(query, kind, data, None, path.as_deref());
                self.emit(query, event).await;
            }
            StreamMessage::Error(source) => {
                let error = InputError::stream(query.name.clone(), source);
                self.reporter
                    .report_and_emit(
                        self.sink.as_ref(),
                        query,
                        &error,
                        context.subscribed_at.elapsed(),
                    )
                    .await;
            }
            StreamMessage::Disconnected {
                error,
                reconnect: reply,
            } => {
                let decision = reconnect.load(Ordering::Acquire);
                warn!(
                    query = %query.name,
                    error = %error,
                    reconnect = decision,
                    "📡 COORDINATOR: Stream disconnected"
                );
                // The connection task may already be gone
                let _ = reply.send(decision);
            }
        }
    }

    /// Report a subscription that could not be opened
    pub async fn handle_subscribe_failure(
        &self,
        query: &QuerySpec,
        error: &InputError,
        elapsed: Duration,
    ) {
        self.reporter
            .report_and_emit(self.sink.as_ref(), query, error, elapsed)
            .await;
    }

    async fn emit(&self, query: &QuerySpec, event: Event) {
        if let Err(e) = self.sink.emit(event).await {
            let error = InputError::from(e);
            log_error(
                "coordinator",
                "emit",
                &error.to_string(),
                Some(&format!("query={}", query.name)),
            );
        }
    }
}

#[async_trait]
impl ScheduledJob for RetrievalCoordinator {
    async fn run(&self) {
        self.run_pull_cycle().await;
    }
}
