//! # Firebase Input
//!
//! Process-level lifecycle of one input instance:
//!
//! ```text
//! Unregistered --register--> Registered --run--> Running(Scheduled | Streaming) --stop--> Stopped
//! ```
//!
//! `register` validates the configuration, builds the query registry and
//! decides the temporal mode: a `schedule` selects pull mode, its absence push
//! mode. The mode never changes afterwards. `run` blocks until `stop` is
//! called from elsewhere (a `StopHandle`, a signal handler). `Stopped` is
//! terminal.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::client::{FirebaseRestClient, RemoteDataClient};
use crate::config::{ConfigurationError, InputConfig};
use crate::coordinator::{PullCycleSummary, RetrievalCoordinator};
use crate::error::{InputError, Result};
use crate::events::{EventNormalizer, EventSink};
use crate::logging::{log_error, log_lifecycle_operation};
use crate::registry::QueryRegistry;
use crate::schedule::{ScheduleEngine, ScheduledJob};
use crate::supervisor::StreamSupervisor;

/// Temporal mode selected at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Scheduled,
    Streaming,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Scheduled => write!(f, "scheduled"),
            RunMode::Streaming => write!(f, "streaming"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Registered,
    Running(RunMode),
    Stopped,
}

impl fmt::Display for InputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputState::Registered => write!(f, "registered"),
            InputState::Running(mode) => write!(f, "running({mode})"),
            InputState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What each shutdown step achieved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// False when the input had already been stopped
    pub performed: bool,
    pub schedule_stopped: bool,
    pub reconnect_disabled: bool,
    pub streams_closed: usize,
    pub stream_close_failures: usize,
    pub client_shutdown: bool,
}

#[derive(Debug)]
enum ModeDriver {
    Scheduled(ScheduleEngine),
    Streaming(StreamSupervisor),
}

impl ModeDriver {
    fn mode(&self) -> RunMode {
        match self {
            ModeDriver::Scheduled(_) => RunMode::Scheduled,
            ModeDriver::Streaming(_) => RunMode::Streaming,
        }
    }
}

struct InputInner {
    coordinator: Arc<RetrievalCoordinator>,
    client: Arc<dyn RemoteDataClient>,
    driver: ModeDriver,
    state: Mutex<InputState>,
}

/// A registered input instance
#[derive(Clone)]
pub struct FirebaseInput {
    inner: Arc<InputInner>,
}

/// Cloneable handle that stops a running input
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<InputInner>,
}

impl fmt::Debug for FirebaseInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseInput")
            .field("mode", &self.inner.driver.mode())
            .field("state", &*self.inner.state.lock())
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl FirebaseInput {
    /// Validate `config` and wire the input to `client` and `sink`
    ///
    /// Every configuration problem surfaces here, before any I/O happens.
    #[instrument(skip_all, fields(refs = config.refs.len()))]
    pub fn register(
        config: &InputConfig,
        client: Arc<dyn RemoteDataClient>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(QueryRegistry::from_config(config)?);
        let schedule = config.schedule_spec()?;

        let coordinator = Arc::new(RetrievalCoordinator::new(
            registry,
            Arc::clone(&client),
            EventNormalizer::from_config(config),
            sink,
        ));

        let driver = match schedule {
            Some(spec) => ModeDriver::Scheduled(ScheduleEngine::new(spec)),
            None => ModeDriver::Streaming(StreamSupervisor::new(Arc::clone(&coordinator))),
        };
        let mode = driver.mode().to_string();

        log_lifecycle_operation(
            "register",
            Some(&mode),
            &InputState::Registered.to_string(),
            Some(&format!("queries={}", coordinator.registry().names().join(","))),
        );

        Ok(Self {
            inner: Arc::new(InputInner {
                coordinator,
                client,
                driver,
                state: Mutex::new(InputState::Registered),
            }),
        })
    }

    /// Register against the realtime database REST API
    pub fn register_with_rest_client(
        config: &InputConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let client = FirebaseRestClient::from_config(config).map_err(|e| {
            ConfigurationError::invalid_value("url", config.url.clone(), e.to_string())
        })?;
        Self::register(config, Arc::new(client), sink)
    }

    pub fn mode(&self) -> RunMode {
        self.inner.driver.mode()
    }

    pub fn state(&self) -> InputState {
        *self.inner.state.lock()
    }

    pub fn coordinator(&self) -> &Arc<RetrievalCoordinator> {
        &self.inner.coordinator
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Enter `Running` and block until the input is stopped
    pub async fn run(&self) -> Result<()> {
        let mode = self.inner.driver.mode();
        self.inner.transition_to_running(mode)?;

        match &self.inner.driver {
            ModeDriver::Scheduled(engine) => {
                let job: Arc<dyn ScheduledJob> = self.inner.coordinator.clone();
                if let Err(e) = engine.start(job) {
                    // A stop that raced the start is a clean exit
                    if self.state() == InputState::Stopped {
                        return Ok(());
                    }
                    return Err(e);
                }
                engine.join().await;
            }
            ModeDriver::Streaming(supervisor) => {
                if let Err(e) = supervisor.start().await {
                    if self.state() == InputState::Stopped {
                        return Ok(());
                    }
                    return Err(e);
                }
                supervisor.join().await;
            }
        }

        info!(mode = %mode, "🔄 INPUT: Run loop exited");
        Ok(())
    }

    /// Run a single pull cycle, then stop
    ///
    /// Only scheduled inputs support this, and only before they have run.
    pub async fn run_once(&self) -> Result<PullCycleSummary> {
        if self.inner.driver.mode() != RunMode::Scheduled {
            return Err(InputError::InvalidState(
                "a single pull cycle needs a scheduled input".to_string(),
            ));
        }
        self.inner.transition_to_running(RunMode::Scheduled)?;

        let summary = self.inner.coordinator.run_pull_cycle().await;
        self.stop().await;
        Ok(summary)
    }

    /// Graceful, best-effort shutdown; see `StopHandle::stop`
    pub async fn stop(&self) -> ShutdownReport {
        self.inner.stop().await
    }
}

impl StopHandle {
    /// Stop the input: halt the schedule, disable reconnects, close every
    /// subscription and shut the client down
    ///
    /// Each step is attempted regardless of how the others went. Stopping an
    /// already stopped input does nothing.
    pub async fn stop(&self) -> ShutdownReport {
        self.inner.stop().await
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.state.lock() == InputState::Stopped
    }
}

impl InputInner {
    fn transition_to_running(&self, mode: RunMode) -> Result<()> {
        let mut state = self.state.lock();
        if *state != InputState::Registered {
            return Err(InputError::InvalidState(format!(
                "cannot run an input in state {state}"
            )));
        }
        *state = InputState::Running(mode);
        drop(state);

        log_lifecycle_operation(
            "run",
            Some(&mode.to_string()),
            &InputState::Running(mode).to_string(),
            None,
        );
        Ok(())
    }

    async fn stop(&self) -> ShutdownReport {
        let previous = std::mem::replace(&mut *self.state.lock(), InputState::Stopped);
        if previous == InputState::Stopped {
            return ShutdownReport::default();
        }

        let mut report = ShutdownReport {
            performed: true,
            ..ShutdownReport::default()
        };

        if let ModeDriver::Scheduled(engine) = &self.driver {
            engine.stop();
            report.schedule_stopped = true;
        }

        if let ModeDriver::Streaming(supervisor) = &self.driver {
            supervisor.disable_reconnect();
            report.reconnect_disabled = true;

            let closed = supervisor.close_all();
            report.streams_closed = closed.closed;
            report.stream_close_failures = closed.failed;
        }

        match self.client.shutdown().await {
            Ok(()) => report.client_shutdown = true,
            Err(e) => log_error("input", "client_shutdown", &e.to_string(), None),
        }

        if report.stream_close_failures > 0 {
            warn!(
                failures = report.stream_close_failures,
                "🔄 INPUT: Some subscriptions failed to close"
            );
        }
        log_lifecycle_operation(
            "stop",
            Some(&self.driver.mode().to_string()),
            &InputState::Stopped.to_string(),
            Some(&format!("previous={previous}")),
        );
        report
    }
}
