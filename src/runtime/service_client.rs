//! Client for the Shadow network service.
//!
//! Each call opens a fresh TCP connection, writes one request line, reads one
//! response line and closes the connection. Every exchange is bounded by the
//! client timeout.

use serde::Serialize;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::debug;

use super::protocol::{self, FrameError, Request, Response, SignalEvent};
use super::task::TaskList;

/// Default bound on one exchange
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors produced by the [`ServiceClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error while communicating with the service.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// JSON (de)serialisation error for envelopes.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The exchange did not complete in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The service closed the connection without answering.
    #[error("connection closed before a response was received")]
    ConnectionClosed,
    /// The service returned an unexpected or malformed payload.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => ClientError::Io(err),
            FrameError::Json(err) => ClientError::Json(err),
            FrameError::MessageTooLarge(size) => {
                ClientError::MalformedResponse(format!("message of {size} bytes exceeds the limit"))
            }
        }
    }
}

/// Convenience result alias for client calls
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Client for one service address
#[derive(Debug, Clone)]
pub struct ServiceClient {
    addr: String,
    timeout: Duration,
}

impl ServiceClient {
    /// Create a client for `addr` (`host:port`)
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    /// Replace the exchange timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Service address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a request and wait for its response
    pub async fn send(&self, request: &Request) -> ClientResult<Response> {
        self.send_raw(request).await
    }

    /// Send any serializable message as a request line
    pub async fn send_raw<T>(&self, message: &T) -> ClientResult<Response>
    where
        T: Serialize + ?Sized,
    {
        match tokio::time::timeout(self.timeout, self.exchange(message)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.timeout)),
        }
    }

    async fn exchange<T>(&self, message: &T) -> ClientResult<Response>
    where
        T: Serialize + ?Sized,
    {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read, mut write) = stream.into_split();

        protocol::write_message(&mut write, message).await?;

        let mut reader = BufReader::new(read);
        let line = protocol::read_message(&mut reader)
            .await?
            .ok_or(ClientError::ConnectionClosed)?;

        let response: Response = serde_json::from_str(&line)
            .map_err(|err| ClientError::MalformedResponse(format!("{err}: {line}")))?;

        debug!(addr = %self.addr, tag = %response.tag, "response received");
        Ok(response)
    }

    /// Register a bot
    pub async fn build(&self, name: &str, tasks: TaskList) -> ClientResult<Response> {
        self.send(&Request::Build {
            name: name.to_string(),
            tasks,
        })
        .await
    }

    /// Server liveness and registry listing
    pub async fn status(&self) -> ClientResult<Response> {
        self.send(&Request::Status).await
    }

    /// Every registered essence
    pub async fn needles(&self) -> ClientResult<Response> {
        self.send(&Request::Needles).await
    }

    /// Remove a bot from the registry
    pub async fn retract(&self, name: &str) -> ClientResult<Response> {
        self.send(&Request::Retract {
            name: name.to_string(),
        })
        .await
    }

    /// Deliver an event to a named bot
    pub async fn signal(
        &self,
        name: &str,
        event: SignalEvent,
        task: Option<&str>,
    ) -> ClientResult<Response> {
        self.send(&Request::Signal {
            name: name.to_string(),
            event,
            task: task.map(str::to_string),
        })
        .await
    }

    /// Persist the registry and stop the server
    pub async fn shutdown(&self) -> ClientResult<Response> {
        self.send(&Request::Shutdown).await
    }
}
