//! Wire protocol for the network service
//!
//! Every connection carries exactly one exchange: a single request line
//! `{"event": ..., "payload": ...}` answered by a single response line
//! `{"tag": ..., "data": ...}`. Lines are newline-delimited JSON and capped at
//! [`MAX_MESSAGE_SIZE`] bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::task::TaskList;

/// Maximum size of one message line (1 MiB), newline excluded
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Request understood by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Request {
    /// Register a new bot built from task descriptors
    Build {
        /// Bot name
        name: String,
        /// Task descriptors
        #[serde(default)]
        tasks: TaskList,
    },
    /// Server liveness and registry listing
    Status,
    /// Every registered essence
    Needles,
    /// Remove a bot from the registry
    Retract {
        /// Bot name
        name: String,
    },
    /// Deliver an event to a named bot
    Signal {
        /// Bot name
        name: String,
        /// Bot event
        event: SignalEvent,
        /// Signal the event targets, for task events
        #[serde(default)]
        task: Option<String>,
    },
    /// Persist the registry and stop accepting connections
    Shutdown,
}

/// Events deliverable to a bot through `signal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalEvent {
    /// Start the bot's execution context
    Start,
    /// Bot liveness
    Status,
    /// Spawn a worker for a task
    Perform,
    /// Join a task's worker
    Wait,
    /// Last compiled outcome of a task
    Result,
    /// Perform, wait and fetch in one step
    Jutsu,
    /// Compiled history
    Compile,
    /// Essence projection
    Essence,
    /// Stop the bot and persist its essence
    Kill,
}

impl SignalEvent {
    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalEvent::Start => "start",
            SignalEvent::Status => "status",
            SignalEvent::Perform => "perform",
            SignalEvent::Wait => "wait",
            SignalEvent::Result => "result",
            SignalEvent::Jutsu => "jutsu",
            SignalEvent::Compile => "compile",
            SignalEvent::Essence => "essence",
            SignalEvent::Kill => "kill",
        }
    }

    /// Whether the event addresses a single task
    pub fn needs_task(&self) -> bool {
        matches!(
            self,
            SignalEvent::Perform | SignalEvent::Wait | SignalEvent::Result | SignalEvent::Jutsu
        )
    }
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tag {
    /// Answer to `build`
    Build,
    /// Answer to `status` and `retract`
    Status,
    /// Answer to `needles`
    Needles,
    /// Answer to `signal`
    Signal,
    /// Answer to `shutdown`
    Shutdown,
    /// Unrecognized request, echoed back
    Invalid,
    /// Domain failure, carries an [`ErrorBody`]
    Error,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Tag::Build => "BUILD",
            Tag::Status => "STATUS",
            Tag::Needles => "NEEDLES",
            Tag::Signal => "SIGNAL",
            Tag::Shutdown => "SHUTDOWN",
            Tag::Invalid => "INVALID",
            Tag::Error => "ERROR",
        };
        f.write_str(tag)
    }
}

/// Payload of an `ERROR` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// Response sent back for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Response tag
    pub tag: Tag,
    /// Tag-specific data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// Response with data
    pub fn new(tag: Tag, data: Value) -> Self {
        Self {
            tag,
            data: Some(data),
        }
    }

    /// `ERROR` response
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let body = ErrorBody {
            kind: kind.into(),
            message: message.into(),
        };
        Self {
            tag: Tag::Error,
            data: serde_json::to_value(body).ok(),
        }
    }

    /// `INVALID` response echoing the original message
    pub fn invalid(original: Value) -> Self {
        Self::new(Tag::Invalid, original)
    }

    /// Error payload, if this is an `ERROR` response
    pub fn error_body(&self) -> Option<ErrorBody> {
        if self.tag != Tag::Error {
            return None;
        }
        self.data
            .clone()
            .and_then(|data| serde_json::from_value(data).ok())
    }
}

/// Parse one request line, producing the `INVALID` response on failure
///
/// Malformed JSON is echoed back as a string; well-formed JSON that is not a
/// known request is echoed back as-is.
pub fn parse_request(raw: &str) -> Result<Request, Response> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return Err(Response::invalid(Value::String(raw.to_string()))),
    };

    serde_json::from_value(value.clone()).map_err(|_| Response::invalid(value))
}

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Line exceeds [`MAX_MESSAGE_SIZE`]
    #[error("message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read one message line
///
/// Returns `None` when the peer closed the connection before sending anything.
/// Bytes that are not valid UTF-8 are replaced, so the line still reaches
/// [`parse_request`] and gets its `INVALID` echo.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = MAX_MESSAGE_SIZE as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;

    if read == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }

    if line.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLarge(line.len()));
    }

    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Write one message as a JSON line and flush
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut data = serde_json::to_vec(message)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLarge(data.len()));
    }

    data.push(b'\n');
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}
