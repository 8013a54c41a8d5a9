//! Server-sent events framing.
//!
//! `SseParser` accepts arbitrary byte chunks (frames and even UTF-8 sequences
//! may straddle chunk boundaries) and yields complete `SseFrame`s.
//! `FirebaseStreamEvent` interprets frames using the realtime database's
//! event vocabulary.

use serde::Deserialize;
use serde_json::Value;

use super::ClientError;
use crate::events::EventKind;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental parser for a `text/event-stream` body
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            self.process_line(&line);
        }

        frames
    }

    fn process_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields do not affect framing
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id: self.id.clone(),
        })
    }
}

/// A frame interpreted with realtime database semantics
#[derive(Debug, Clone, PartialEq)]
pub enum FirebaseStreamEvent {
    Change {
        kind: EventKind,
        path: Option<String>,
        data: Value,
    },
    KeepAlive,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    data: Value,
}

impl FirebaseStreamEvent {
    /// Interpret a frame; `cancel` and `auth_revoked` become errors
    pub fn from_frame(frame: &SseFrame) -> Result<Self, ClientError> {
        match frame.event.as_str() {
            "keep-alive" => Ok(FirebaseStreamEvent::KeepAlive),
            "cancel" => Err(ClientError::Cancelled(frame.data.clone())),
            "auth_revoked" => Err(ClientError::AuthRevoked),
            name => {
                let payload: ChangePayload = serde_json::from_str(&frame.data).map_err(|e| {
                    ClientError::Decode(format!("invalid '{name}' payload: {e}"))
                })?;
                Ok(FirebaseStreamEvent::Change {
                    kind: EventKind::from(name),
                    path: payload.path,
                    data: payload.data,
                })
            }
        }
    }
}
