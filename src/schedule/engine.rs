//! # Schedule Engine
//!
//! Runs one `ScheduledJob` on the cadence of a `ScheduleSpec`. All triggers run
//! on a single spawned worker task, so two invocations never overlap: a slow
//! run delays the next one instead of running beside it.
//!
//! `stop` halts future triggers; a run already in progress finishes. `join`
//! blocks its caller until `stop` has been called and the worker has drained,
//! which makes it the main loop of a scheduled input.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::ScheduleSpec;
use crate::config::ConfigResult;
use crate::constants::defaults;
use crate::error::{InputError, Result};

/// Work driven by the schedule engine
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Perform one triggered run
    async fn run(&self);
}

/// Drives a single job from a single dedicated worker
#[derive(Debug)]
pub struct ScheduleEngine {
    spec: ScheduleSpec,
    running: Arc<AtomicBool>,
    trigger_count: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleEngine {
    /// Create an engine for an already-validated spec
    pub fn new(spec: ScheduleSpec) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            spec,
            running: Arc::new(AtomicBool::new(false)),
            trigger_count: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            worker: Mutex::new(None),
        }
    }

    /// Validate raw schedule options and create an engine for them
    pub fn from_options(options: &BTreeMap<String, String>) -> ConfigResult<Self> {
        ScheduleSpec::from_options(options).map(Self::new)
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    /// Whether the worker has been started and not yet stopped
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of triggers fired so far
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::Acquire)
    }

    /// Spawn the worker that runs `job` on this engine's schedule
    ///
    /// Must be called from within a tokio runtime. An engine starts at most
    /// once; a stopped engine cannot be restarted.
    pub fn start(&self, job: Arc<dyn ScheduledJob>) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(InputError::InvalidState(
                "schedule engine has already been started".to_string(),
            ));
        }
        if *self.shutdown_tx.borrow() {
            return Err(InputError::InvalidState(
                "schedule engine has been stopped".to_string(),
            ));
        }

        self.running.store(true, Ordering::Release);

        let context = WorkerContext {
            spec: self.spec.clone(),
            job,
            running: Arc::clone(&self.running),
            trigger_count: Arc::clone(&self.trigger_count),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };

        info!(
            schedule = self.spec.kind(),
            "⏰ SCHEDULE: Starting schedule worker"
        );
        *worker = Some(tokio::spawn(context.run()));
        Ok(())
    }

    /// Halt future triggers; a run in progress is allowed to finish
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!(
                triggers = self.trigger_count(),
                "⏰ SCHEDULE: Stop requested"
            );
        }
        self.shutdown_tx.send_replace(true);
    }

    /// Block until `stop` is called, then wait for the worker to drain
    pub async fn join(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        wait_for_shutdown(&mut shutdown_rx).await;

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "⏰ SCHEDULE: Worker terminated abnormally");
            }
        }
        debug!("⏰ SCHEDULE: Worker joined");
    }
}

pub(crate) async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    // A closed channel means the engine is gone, which also ends the wait
    let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
}

struct WorkerContext {
    spec: ScheduleSpec,
    job: Arc<dyn ScheduledJob>,
    running: Arc<AtomicBool>,
    trigger_count: Arc<AtomicU64>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerContext {
    async fn run(mut self) {
        match self.spec.clone() {
            ScheduleSpec::Every(period) => self.run_every(period).await,
            ScheduleSpec::Cron { .. } => self.run_cron().await,
            ScheduleSpec::At(instant) => {
                let delay = match (instant - Utc::now()).to_std() {
                    Ok(delay) => delay,
                    Err(_) => {
                        warn!(
                            at = %instant,
                            "⏰ SCHEDULE: 'at' instant is in the past, firing immediately"
                        );
                        Duration::ZERO
                    }
                };
                self.run_once(delay).await;
            }
            ScheduleSpec::In(delay) => self.run_once(delay).await,
        }
        debug!("⏰ SCHEDULE: Worker loop exited");
    }

    async fn run_every(&mut self, period: Duration) {
        let first = Instant::now() + defaults::EVERY_INITIAL_DELAY;
        let mut interval = tokio::time::interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            }
            if !self.fire().await {
                break;
            }
        }
    }

    async fn run_cron(&mut self) {
        loop {
            let Some(next) = self.spec.next_cron_fire(Utc::now()) else {
                warn!("⏰ SCHEDULE: Cron expression has no future instants, worker idle");
                break;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "⏰ SCHEDULE: Next cron trigger");

            if !self.sleep_unless_stopped(delay).await || !self.fire().await {
                break;
            }
        }
    }

    async fn run_once(&mut self, delay: Duration) {
        if self.sleep_unless_stopped(delay).await {
            self.fire().await;
        }
    }

    /// Returns false when shutdown arrived before the delay elapsed
    async fn sleep_unless_stopped(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_for_shutdown(&mut self.shutdown_rx) => false,
        }
    }

    /// Run the job once; returns false if the engine was stopped meanwhile
    async fn fire(&self) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        let trigger = self.trigger_count.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(trigger = trigger, "⏰ SCHEDULE: Trigger fired");
        self.job.run().await;
        self.running.load(Ordering::Acquire)
    }
}
