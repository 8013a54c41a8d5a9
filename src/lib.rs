#![allow(clippy::doc_markdown)] // Allow technical terms like Firebase, SSE in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Firebase Input
//!
//! Ingests Firebase Realtime Database references into an event pipeline.
//!
//! ## Overview
//!
//! An input retrieves a set of named references (`refs`) in one of two
//! temporal modes, fixed for its whole lifetime:
//!
//! - **Pull mode**: a `schedule` (`cron`, `every`, `at` or `in`) triggers a
//!   fetch of every reference. Each fetch is independent; one failing
//!   reference never stops the others.
//! - **Push mode**: without a schedule, one streaming subscription per
//!   reference delivers changes as they happen and reconnects until the input
//!   is stopped.
//!
//! Every retrieved value becomes an [`Event`]: the data at the event root (or
//! under `target`) plus a metadata envelope describing the query, the host and
//! how long the fetch took. Failures are not errors to the caller; they become
//! events tagged `_firebasefailure` carrying a `firebase_failure` record.
//!
//! ## Module Organization
//!
//! - [`config`] - Typed configuration, file/environment loading
//! - [`registry`] - Validated set of named queries
//! - [`schedule`] - Schedule specs and the single-worker schedule engine
//! - [`client`] - Remote database seam and the REST/streaming implementation
//! - [`events`] - Event shape, normalisation, failure reporting, sinks
//! - [`coordinator`] - Pull cycles and push message handling
//! - [`supervisor`] - Live subscription set for push mode
//! - [`input`] - Lifecycle: register, run, stop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use firebase_input::{ChannelSink, FirebaseInput, InputConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = InputConfig::from_yaml_str(
//!     r#"
//! url: https://example.firebaseio.com
//! refs:
//!   users:
//!     path: /users
//! schedule:
//!   every: 5m
//! "#,
//! )?;
//!
//! let (sink, mut events) = ChannelSink::new(1000, Duration::from_secs(5));
//! let input = FirebaseInput::register_with_rest_client(&config, Arc::new(sink))?;
//!
//! let stop = input.stop_handle();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event.to_json().unwrap_or_default());
//!     }
//! });
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     stop.stop().await;
//! });
//!
//! input.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod input;
pub mod logging;
pub mod registry;
pub mod schedule;
pub mod supervisor;

pub use client::{ClientError, FirebaseRestClient, RemoteDataClient, StreamMessage, Subscription};
pub use config::{ConfigManager, ConfigurationError, InputConfig};
pub use coordinator::{PullCycleSummary, RetrievalCoordinator};
pub use error::{InputError, Result};
pub use events::{
    ChannelSink, Event, EventKind, EventNormalizer, EventSink, FailureRecord, FailureReporter,
    JsonLinesSink, MetadataEnvelope, SinkError,
};
pub use input::{FirebaseInput, InputState, RunMode, ShutdownReport, StopHandle};
pub use registry::{QueryRegistry, QuerySpec};
pub use schedule::{ScheduleEngine, ScheduleSpec, ScheduledJob};
pub use supervisor::StreamSupervisor;
