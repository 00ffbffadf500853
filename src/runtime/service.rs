//! Network control service for the Shadow runtime.
//!
//! [`Service`] translates protocol requests into registry and bot operations;
//! [`Server`] accepts TCP connections and runs one request/response exchange per
//! connection. Bots revived for `signal` requests are kept in a live table so
//! later requests reach the same running instance.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::actor::{Actor, ActorConfig};
use super::error::{ActorError, RegistryError};
use super::essence::Essence;
use super::protocol::{self, FrameError, Request, Response, SignalEvent, Tag, parse_request};
use super::registry::Registry;
use super::task::{TaskCatalog, TaskList};
use crate::{PROTOCOL_VERSION, VERSION};

/// Failures reported to the caller as `ERROR` responses
#[derive(Debug, Error)]
enum ServiceError {
    #[error(transparent)]
    Actor(#[from] ActorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("event '{0}' requires a task")]
    MissingTask(SignalEvent),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ServiceError {
    fn kind(&self) -> &str {
        match self {
            ServiceError::Actor(err) => err.kind(),
            ServiceError::Registry(err) => err.kind(),
            ServiceError::MissingTask(_) => "missing_task",
            ServiceError::Encode(_) => "encode",
        }
    }
}

impl From<ServiceError> for Response {
    fn from(err: ServiceError) -> Self {
        Response::error(err.kind(), err.to_string())
    }
}

/// Request dispatcher shared by every connection
pub struct Service {
    registry: Arc<Registry>,
    catalog: Arc<TaskCatalog>,
    actor_config: ActorConfig,
    bots: Mutex<HashMap<String, Arc<Actor>>>,
    started_at: DateTime<Utc>,
    shutdown: watch::Sender<bool>,
}

impl Service {
    /// Create a service over an explicitly constructed registry and catalog
    pub fn new(registry: Arc<Registry>, catalog: Arc<TaskCatalog>, actor_config: ActorConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            catalog,
            actor_config,
            bots: Mutex::new(HashMap::new()),
            started_at: Utc::now(),
            shutdown,
        }
    }

    /// Registry backing this service
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Subscribe to the shutdown flag
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask the accept loop to stop
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Names of bots with a running execution context
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .bots
            .lock()
            .values()
            .filter(|bot| bot.alive())
            .map(|bot| bot.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Parse and dispatch one raw request line
    pub async fn handle_message(&self, raw: &str) -> Response {
        match parse_request(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(invalid) => {
                warn!("invalid request: {raw}");
                invalid
            }
        }
    }

    /// Dispatch a parsed request
    pub async fn dispatch(&self, request: Request) -> Response {
        let result = match request {
            Request::Build { name, tasks } => self.cmd_build(name, tasks),
            Request::Status => self.cmd_status(),
            Request::Needles => self.cmd_needles(),
            Request::Retract { name } => self.cmd_retract(&name).await,
            Request::Signal { name, event, task } => self.cmd_signal(&name, event, task).await,
            Request::Shutdown => self.cmd_shutdown().await,
        };

        result.unwrap_or_else(|err| {
            warn!(kind = err.kind(), "request failed: {err}");
            Response::from(err)
        })
    }

    fn cmd_build(&self, name: String, tasks: TaskList) -> Result<Response, ServiceError> {
        // Reject descriptors the local catalog cannot run.
        self.catalog.bind_all(&tasks)?;

        let created = self.registry.sew(Essence::new(name.clone(), tasks));
        let saved = !created || self.persist();

        info!(bot = %name, created, "build");
        Ok(Response::new(
            Tag::Build,
            json!({ "name": name, "created": created, "saved": saved }),
        ))
    }

    fn cmd_status(&self) -> Result<Response, ServiceError> {
        Ok(Response::new(
            Tag::Status,
            json!({
                "status": "Alive",
                "version": VERSION,
                "protocol_version": PROTOCOL_VERSION,
                "started_at": self.started_at.to_rfc3339(),
                "needles": self.registry.names(),
                "running": self.running(),
            }),
        ))
    }

    fn cmd_needles(&self) -> Result<Response, ServiceError> {
        let essences = self.registry.essences();
        Ok(Response::new(Tag::Needles, serde_json::to_value(essences)?))
    }

    async fn cmd_retract(&self, name: &str) -> Result<Response, ServiceError> {
        let live = self.bots.lock().get(name).cloned();
        if let Some(bot) = live {
            if bot.alive() {
                info!(bot = name, "stopping before retract");
                bot.stop().await?;
            }
            self.bots.lock().remove(name);
        }

        let essence = self
            .registry
            .retract(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let saved = self.persist();

        Ok(Response::new(Tag::Status, with_saved(serde_json::to_value(essence)?, saved)))
    }

    async fn cmd_signal(
        &self,
        name: &str,
        event: SignalEvent,
        task: Option<String>,
    ) -> Result<Response, ServiceError> {
        let bot = self.bot(name)?;

        if event != SignalEvent::Start && !bot.alive() {
            return Err(ActorError::NotAlive(name.to_string()).into());
        }

        debug!(bot = name, %event, ?task, "signal");
        let result = match (event, task.as_deref()) {
            (SignalEvent::Start, _) => {
                bot.start()?;
                json!(bot.alive())
            }
            (SignalEvent::Status, _) => json!(bot.alive()),
            (SignalEvent::Perform, Some(signal)) => {
                bot.perform(signal).await?;
                json!(true)
            }
            (SignalEvent::Wait, Some(signal)) => {
                bot.wait(signal).await?;
                json!(true)
            }
            (SignalEvent::Result, Some(signal)) => match bot.result(signal).await? {
                Some(outcome) => json!([signal, outcome]),
                None => Value::Null,
            },
            (SignalEvent::Jutsu, Some(signal)) => match bot.jutsu(signal).await? {
                Some(result) => json!([result.signal, result.outcome]),
                None => Value::Null,
            },
            (SignalEvent::Compile, _) => serde_json::to_value(bot.compile().await?)?,
            (SignalEvent::Essence, _) => serde_json::to_value(bot.essence().await?)?,
            (SignalEvent::Kill, _) => {
                bot.stop().await?;
                let essence = bot.essence().await?;
                self.registry.replace(essence.clone());
                let saved = self.persist();
                with_saved(serde_json::to_value(essence)?, saved)
            }
            (event, None) => return Err(ServiceError::MissingTask(event)),
        };

        Ok(Response::new(
            Tag::Signal,
            json!({
                "name": name,
                "event": event,
                "task": task,
                "result": result,
            }),
        ))
    }

    async fn cmd_shutdown(&self) -> Result<Response, ServiceError> {
        let live: Vec<Arc<Actor>> = self
            .bots
            .lock()
            .values()
            .filter(|bot| bot.alive())
            .cloned()
            .collect();

        info!(bots = live.len(), "shutdown requested");
        let stops = futures::future::join_all(live.iter().map(|bot| bot.stop())).await;

        let mut stopped = 0;
        for (bot, outcome) in live.iter().zip(stops) {
            match outcome {
                Ok(()) => {
                    stopped += 1;
                    if let Ok(essence) = bot.essence().await {
                        self.registry.replace(essence);
                    }
                }
                Err(err) => error!(bot = bot.name(), "failed to stop: {err}"),
            }
        }

        let saved = self.persist();

        Ok(Response::new(
            Tag::Shutdown,
            json!({ "stopped": stopped, "saved": saved }),
        ))
    }

    /// Save the registry, reporting failure as `false`
    ///
    /// The in-memory change stands either way; callers surface the flag as
    /// `saved` in their response.
    fn persist(&self) -> bool {
        match self.registry.save() {
            Ok(()) => true,
            Err(err) => {
                error!(path = %self.registry.path().display(), "failed to persist registry: {err}");
                false
            }
        }
    }

    /// Live bot for `name`, revived from the registry on first use
    fn bot(&self, name: &str) -> Result<Arc<Actor>, ServiceError> {
        let mut bots = self.bots.lock();
        if let Some(bot) = bots.get(name) {
            return Ok(bot.clone());
        }

        let essence = self.registry.get(name)?;
        let bot = Arc::new(Actor::new(essence, &self.catalog, self.actor_config)?);
        bots.insert(name.to_string(), bot.clone());
        debug!(bot = name, "revived from registry");
        Ok(bot)
    }
}

/// Add a `saved` flag to an object payload
fn with_saved(mut data: Value, saved: bool) -> Value {
    if let Value::Object(fields) = &mut data {
        fields.insert("saved".to_string(), Value::Bool(saved));
    }
    data
}

/// Default bound on receiving a request line after accepting a connection
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP front-end for a [`Service`]
pub struct Server {
    listener: TcpListener,
    service: Arc<Service>,
    read_timeout: Duration,
}

impl Server {
    /// Bind a listener for `service`
    pub async fn bind(addr: impl ToSocketAddrs, service: Arc<Service>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Set the bound on receiving a request line
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Service shared by all connections
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Accept connections until shutdown is requested
    pub async fn serve(self) -> io::Result<()> {
        let mut shutdown = self.service.subscribe_shutdown();
        info!(addr = %self.local_addr()?, "listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let service = self.service.clone();
                        let read_timeout = self.read_timeout;
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(service, stream, read_timeout).await {
                                warn!(%peer, "connection failed: {err}");
                            }
                        });
                    }
                    Err(err) => warn!("accept failed: {err}"),
                },
                _ = stopped(&mut shutdown) => {
                    info!("no longer accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn handle_connection(
    service: Arc<Service>,
    stream: TcpStream,
    read_timeout: Duration,
) -> Result<(), FrameError> {
    let peer = stream.peer_addr().ok();
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let read = tokio::time::timeout(read_timeout, protocol::read_message(&mut reader)).await;
    let response = match read {
        Ok(Ok(Some(line))) => service.handle_message(&line).await,
        Ok(Ok(None)) => {
            debug!(?peer, "closed without a request");
            return Ok(());
        }
        Ok(Err(FrameError::MessageTooLarge(size))) => {
            Response::error("too_large", format!("message of {size} bytes exceeds the limit"))
        }
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            warn!(?peer, "no request within {}ms", read_timeout.as_millis());
            Response::error(
                "read_timeout",
                format!("no request received within {}ms", read_timeout.as_millis()),
            )
        }
    };

    protocol::write_message(&mut write, &response).await?;

    // The answer goes out before the accept loop is told to stop.
    if response.tag == Tag::Shutdown {
        service.request_shutdown();
    }

    Ok(())
}
