//! # Events
//!
//! The canonical output shape of the input and everything that produces or
//! consumes it: normalisation of retrieved values, failure reporting, and the
//! sink events are handed to.

pub mod event;
pub mod failure;
pub mod normalizer;
pub mod sink;

pub use event::{Event, EventKind};
pub use failure::{FailureRecord, FailureReporter};
pub use normalizer::{EventNormalizer, MetadataEnvelope};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, SinkError};
