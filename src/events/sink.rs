//! # Event Sinks
//!
//! The hand-off point to the downstream pipeline. Emitting is fire-and-forget
//! from the producer's perspective but bounded: a full queue makes `emit`
//! wait at most the configured enqueue timeout before failing.
//!
//! ```rust
//! use firebase_input::{ChannelSink, Event, EventSink};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let (sink, mut events) = ChannelSink::new(16, Duration::from_millis(100));
//! sink.emit(Event::new()).await.unwrap();
//! assert!(events.recv().await.is_some());
//! # });
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use super::event::Event;
use crate::config::SinkConfig;

/// Error types for event emission
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Event channel is closed")]
    Closed,
    #[error("Timed out after {0:?} waiting for queue space")]
    Timeout(Duration),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream consumer of emitted events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hand one event to the pipeline
    async fn emit(&self, event: Event) -> Result<(), SinkError>;
}

/// Sink backed by a bounded in-process queue
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Event>,
    enqueue_timeout: Duration,
}

impl ChannelSink {
    /// Create a sink and the receiver the pipeline reads from
    pub fn new(capacity: usize, enqueue_timeout: Duration) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                enqueue_timeout,
            },
            receiver,
        )
    }

    pub fn from_config(config: &SinkConfig) -> (Self, mpsc::Receiver<Event>) {
        Self::new(config.buffer_size, config.enqueue_timeout())
    }

    /// Remaining queue capacity
    pub fn capacity(&self) -> usize {
        self.sender.capacity()
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: Event) -> Result<(), SinkError> {
        self.sender
            .send_timeout(event, self.enqueue_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    SinkError::Timeout(self.enqueue_timeout)
                }
                mpsc::error::SendTimeoutError::Closed(_) => SinkError::Closed,
            })
    }
}

/// Sink writing one JSON document per line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W> EventSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, event: Event) -> Result<(), SinkError> {
        let mut line = event.to_json()?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: i64) -> Event {
        let mut event = Event::new();
        event.set("n", json!(n));
        event
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut receiver) = ChannelSink::new(4, Duration::from_millis(50));
        sink.emit(event(1)).await.unwrap();
        sink.emit(event(2)).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().get("n"), Some(&json!(1)));
        assert_eq!(receiver.recv().await.unwrap().get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_full_channel_times_out() {
        let (sink, _receiver) = ChannelSink::new(1, Duration::from_millis(20));
        sink.emit(event(1)).await.unwrap();

        let err = sink.emit(event(2)).await.unwrap_err();
        assert!(matches!(err, SinkError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (sink, receiver) = ChannelSink::new(1, Duration::from_millis(20));
        drop(receiver);

        assert!(matches!(sink.emit(event(1)).await, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_json_lines_sink_writes_lines() {
        let sink = JsonLinesSink::new(Vec::<u8>::new());
        sink.emit(event(1)).await.unwrap();
        sink.emit(event(2)).await.unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output, "{\"n\":1}\n{\"n\":2}\n");
    }
}
