//! Bots: actors that own signal-addressable tasks
//!
//! An [`Actor`] is the caller-side owner of a bot. Starting it spawns an
//! isolated execution context: a dedicated OS thread driving a single-threaded
//! event loop on its own runtime. The loop owns the live workers and the
//! compiled history; callers reach it only through the request channel, and
//! every request carries its own reply port.
//!
//! Requests are handled strictly in arrival order. `wait` joins the worker
//! inline, so requests queued behind a `wait` are not handled until the
//! awaited task finishes or the wait bound expires. Workers themselves run
//! concurrently on their own threads.
//!
//! Cancellation is cooperative: a kill stops the loop but in-flight workers are
//! abandoned, not terminated. An unbounded task keeps its thread until it
//! returns on its own.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::error::{ActorError, ActorResult};
use super::essence::{Essence, History};
use super::task::{BoundTask, TaskCatalog, TaskList, TaskOutcome, TaskResult};
use super::worker::{WorkerHandle, thread_name};

/// Timeouts governing an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorConfig {
    /// Bound on joining a worker during `wait`
    pub wait_timeout: Duration,

    /// Bound on waiting for the event loop to answer a request
    pub request_timeout: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Lifecycle state of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorState {
    /// No execution context is running
    Off,
    /// The event loop is running
    On,
}

type Reply<T> = oneshot::Sender<ActorResult<T>>;

/// Requests understood by the event loop
enum ActorRequest {
    Perform { signal: String, reply: Reply<()> },
    Wait { signal: String, reply: Reply<()> },
    Result { signal: String, reply: Reply<Option<TaskOutcome>> },
    Jutsu { signal: String, reply: Reply<Option<TaskResult>> },
    Alive { signal: String, reply: Reply<bool> },
    Compile { reply: Reply<History> },
    Essence { reply: Reply<Essence> },
    Kill { reply: Reply<()> },
}

struct Context {
    requests: mpsc::UnboundedSender<ActorRequest>,
    thread: JoinHandle<()>,
    exited: Option<oneshot::Receiver<History>>,
}

impl Context {
    fn running(&self) -> bool {
        !self.thread.is_finished()
    }
}

/// A bot: named owner of tasks, driven through its event loop
pub struct Actor {
    name: String,
    tasks: TaskList,
    bound: Arc<HashMap<String, BoundTask>>,
    config: ActorConfig,
    history: Mutex<History>,
    context: Mutex<Option<Context>>,
}

impl Actor {
    /// Create a stopped actor from an essence, resolving its tasks in `catalog`
    pub fn new(essence: Essence, catalog: &TaskCatalog, config: ActorConfig) -> ActorResult<Self> {
        let bound = catalog.bind_all(&essence.tasks)?;

        Ok(Self {
            name: essence.name,
            tasks: essence.tasks,
            bound: Arc::new(bound),
            config,
            history: Mutex::new(essence.history),
            context: Mutex::new(None),
        })
    }

    /// Bot name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task descriptors
    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    /// Timeouts in effect
    pub fn config(&self) -> &ActorConfig {
        &self.config
    }

    /// Whether the execution context is running
    pub fn alive(&self) -> bool {
        self.context.lock().as_ref().is_some_and(Context::running)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ActorState {
        if self.alive() {
            ActorState::On
        } else {
            ActorState::Off
        }
    }

    /// Start the execution context
    ///
    /// Starting a running actor only warns. A context that has already run to
    /// completion is replaced by a fresh one with fresh channels.
    pub fn start(&self) -> ActorResult<()> {
        let mut context = self.context.lock();

        if context.as_ref().is_some_and(Context::running) {
            warn!(actor = %self.name, "already running");
            return Ok(());
        }

        if let Some(consumed) = context.take() {
            info!(actor = %self.name, "restarting consumed execution context");
            self.absorb(consumed);
        }

        info!(actor = %self.name, "starting up");
        *context = Some(self.spawn_context()?);
        Ok(())
    }

    /// Stop the execution context and recover its history
    ///
    /// A no-op when the actor is not running.
    pub async fn stop(&self) -> ActorResult<()> {
        let (requests, exited) = {
            let mut context = self.context.lock();
            match context.as_mut() {
                Some(ctx) if ctx.running() => (ctx.requests.clone(), ctx.exited.take()),
                _ => {
                    warn!(actor = %self.name, "already stopped");
                    if let Some(consumed) = context.take() {
                        self.absorb(consumed);
                    }
                    return Ok(());
                }
            }
        };

        info!(actor = %self.name, "stopping");

        // The kill is acknowledged through `exited`, not through its reply.
        let (reply, _) = oneshot::channel();
        let _ = requests.send(ActorRequest::Kill { reply });

        let Some(mut exited) = exited else {
            return Err(ActorError::NotAlive(self.name.clone()));
        };

        match tokio::time::timeout(self.config.request_timeout, &mut exited).await {
            Ok(Ok(history)) => {
                *self.history.lock() = history;
                *self.context.lock() = None;
                info!(actor = %self.name, "stopped");
                Ok(())
            }
            Ok(Err(_)) => {
                warn!(actor = %self.name, "execution context ended without reporting its history");
                *self.context.lock() = None;
                Ok(())
            }
            Err(_) => {
                if let Some(ctx) = self.context.lock().as_mut() {
                    ctx.exited = Some(exited);
                }
                error!(actor = %self.name, "did not stop in time");
                Err(ActorError::RequestTimeout {
                    actor: self.name.clone(),
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Stop, then start with a fresh execution context
    pub async fn restart(&self) -> ActorResult<()> {
        info!(actor = %self.name, "restarting");
        self.stop().await?;
        self.start()
    }

    /// Spawn a worker for `signal` without waiting for it
    pub async fn perform(&self, signal: &str) -> ActorResult<()> {
        let signal = signal.to_string();
        self.ask(|reply| ActorRequest::Perform { signal, reply }).await
    }

    /// Join the outstanding worker for `signal`, bounded by the wait timeout
    pub async fn wait(&self, signal: &str) -> ActorResult<()> {
        let signal = signal.to_string();
        self.ask(|reply| ActorRequest::Wait { signal, reply }).await
    }

    /// Compile pending results and return the last outcome for `signal`
    pub async fn result(&self, signal: &str) -> ActorResult<Option<TaskOutcome>> {
        let signal = signal.to_string();
        self.ask(|reply| ActorRequest::Result { signal, reply }).await
    }

    /// Perform, wait, and fetch the result of `signal` in one round trip
    pub async fn jutsu(&self, signal: &str) -> ActorResult<Option<TaskResult>> {
        let signal = signal.to_string();
        self.ask(|reply| ActorRequest::Jutsu { signal, reply }).await
    }

    /// Whether the worker for `signal` is still executing
    pub async fn worker_alive(&self, signal: &str) -> ActorResult<bool> {
        let signal = signal.to_string();
        self.ask(|reply| ActorRequest::Alive { signal, reply }).await
    }

    /// Drain the result channel into the history and return a snapshot
    pub async fn compile(&self) -> ActorResult<History> {
        self.ask(|reply| ActorRequest::Compile { reply }).await
    }

    /// Project `{name, tasks, history}` as of now
    pub async fn essence(&self) -> ActorResult<Essence> {
        if !self.alive() {
            return Ok(self.snapshot());
        }

        match self.ask(|reply| ActorRequest::Essence { reply }).await {
            Err(ActorError::NotAlive(_)) => Ok(self.snapshot()),
            other => other,
        }
    }

    /// Essence built from the last history recovered from the loop
    fn snapshot(&self) -> Essence {
        {
            let mut context = self.context.lock();
            if context.as_ref().is_some_and(|ctx| !ctx.running()) {
                if let Some(consumed) = context.take() {
                    self.absorb(consumed);
                }
            }
        }

        Essence::new(self.name.clone(), self.tasks.clone()).with_history(self.history.lock().clone())
    }

    async fn ask<T>(&self, build: impl FnOnce(Reply<T>) -> ActorRequest) -> ActorResult<T> {
        let requests = {
            let context = self.context.lock();
            match context.as_ref() {
                Some(ctx) if ctx.running() => ctx.requests.clone(),
                _ => {
                    error!(actor = %self.name, "not running");
                    return Err(ActorError::NotAlive(self.name.clone()));
                }
            }
        };

        let (reply, response) = oneshot::channel();
        requests
            .send(build(reply))
            .map_err(|_| ActorError::NotAlive(self.name.clone()))?;

        match tokio::time::timeout(self.config.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ActorError::NotAlive(self.name.clone())),
            Err(_) => {
                error!(actor = %self.name, "request timed out");
                Err(ActorError::RequestTimeout {
                    actor: self.name.clone(),
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Pull the final history out of a finished context
    fn absorb(&self, mut consumed: Context) {
        if let Some(exited) = consumed.exited.as_mut() {
            if let Ok(history) = exited.try_recv() {
                *self.history.lock() = history;
            }
        }
    }

    fn spawn_context(&self) -> ActorResult<Context> {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = oneshot::channel();

        let core = Core::new(
            self.name.clone(),
            self.tasks.clone(),
            self.bound.clone(),
            self.history.lock().clone(),
            self.config.wait_timeout,
        );

        let name = self.name.clone();
        let thread = thread::Builder::new()
            .name(thread_name("bot", &self.name))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!(actor = %name, "failed to build event loop runtime: {err}");
                        let _ = exited_tx.send(core.history);
                        return;
                    }
                };

                let history = runtime.block_on(core.run(requests_rx));
                drop(runtime);
                let _ = exited_tx.send(history);
            })
            .map_err(|err| ActorError::Spawn(err.to_string()))?;

        Ok(Context {
            requests: requests_tx,
            thread,
            exited: Some(exited_rx),
        })
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("tasks", &self.tasks.signals())
            .field("state", &self.state())
            .finish()
    }
}

/// Event loop state, owned by the execution context thread
struct Core {
    name: String,
    tasks: TaskList,
    bound: Arc<HashMap<String, BoundTask>>,
    state: ActorState,
    results_tx: mpsc::UnboundedSender<TaskResult>,
    results_rx: mpsc::UnboundedReceiver<TaskResult>,
    workers: HashMap<String, WorkerHandle>,
    history: History,
    wait_timeout: Duration,
}

impl Core {
    fn new(
        name: String,
        tasks: TaskList,
        bound: Arc<HashMap<String, BoundTask>>,
        history: History,
        wait_timeout: Duration,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            name,
            tasks,
            bound,
            state: ActorState::Off,
            results_tx,
            results_rx,
            workers: HashMap::new(),
            history,
            wait_timeout,
        }
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<ActorRequest>) -> History {
        self.state = ActorState::On;
        info!(actor = %self.name, "event loop running");

        while self.state == ActorState::On {
            let Some(request) = requests.recv().await else {
                debug!(actor = %self.name, "request channel closed");
                break;
            };
            self.handle(request).await;
        }

        self.state = ActorState::Off;
        self.compile();

        let abandoned = self.workers.values().filter(|worker| worker.is_alive()).count();
        if abandoned > 0 {
            warn!(actor = %self.name, abandoned, "abandoning in-flight workers");
        }

        info!(actor = %self.name, "stopped successfully");
        self.history
    }

    async fn handle(&mut self, request: ActorRequest) {
        match request {
            ActorRequest::Perform { signal, reply } => {
                let _ = reply.send(self.perform(&signal));
            }
            ActorRequest::Wait { signal, reply } => {
                let _ = reply.send(self.wait(&signal).await);
            }
            ActorRequest::Result { signal, reply } => {
                let _ = reply.send(self.result(&signal));
            }
            ActorRequest::Jutsu { signal, reply } => {
                let _ = reply.send(self.jutsu(&signal).await);
            }
            ActorRequest::Alive { signal, reply } => {
                let _ = reply.send(self.worker_alive(&signal));
            }
            ActorRequest::Compile { reply } => {
                self.compile();
                let _ = reply.send(Ok(self.history.clone()));
            }
            ActorRequest::Essence { reply } => {
                self.compile();
                let essence = Essence::new(self.name.clone(), self.tasks.clone())
                    .with_history(self.history.clone());
                let _ = reply.send(Ok(essence));
            }
            ActorRequest::Kill { reply } => {
                info!(actor = %self.name, "kill received");
                self.state = ActorState::Off;
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn task(&self, signal: &str) -> ActorResult<&BoundTask> {
        self.bound.get(signal).ok_or_else(|| {
            error!(actor = %self.name, signal, "task not found");
            ActorError::TaskNotFound {
                actor: self.name.clone(),
                signal: signal.to_string(),
            }
        })
    }

    fn perform(&mut self, signal: &str) -> ActorResult<()> {
        let task = self.task(signal)?.clone();

        let worker = WorkerHandle::spawn(task, self.results_tx.clone())?;
        info!(actor = %self.name, signal, run_id = %worker.run_id(), "performing task");

        if let Some(previous) = self.workers.insert(signal.to_string(), worker) {
            if previous.is_alive() {
                warn!(
                    actor = %self.name,
                    signal,
                    run_id = %previous.run_id(),
                    "previous worker still running, its handle is released"
                );
            }
        }

        Ok(())
    }

    async fn wait(&mut self, signal: &str) -> ActorResult<()> {
        self.task(signal)?;

        let Some(worker) = self.workers.get(signal) else {
            warn!(actor = %self.name, signal, "task not performed");
            return Err(ActorError::NotPerformed(signal.to_string()));
        };

        info!(actor = %self.name, signal, "waiting for task to finish");
        let joined = worker.join(self.wait_timeout).await;

        match joined {
            Ok(()) => {
                self.workers.remove(signal);
                info!(actor = %self.name, signal, "task joined");
                Ok(())
            }
            Err(err) => {
                error!(actor = %self.name, signal, "timed out while waiting for task to finish");
                Err(err)
            }
        }
    }

    fn result(&mut self, signal: &str) -> ActorResult<Option<TaskOutcome>> {
        self.task(signal)?;
        self.compile();

        let outcome = self.history.get(signal).cloned();
        if outcome.is_none() {
            warn!(actor = %self.name, signal, "result not found");
        }
        Ok(outcome)
    }

    async fn jutsu(&mut self, signal: &str) -> ActorResult<Option<TaskResult>> {
        self.perform(signal)?;
        self.wait(signal).await?;

        let outcome = self.result(signal)?;
        Ok(outcome.map(|outcome| TaskResult {
            signal: signal.to_string(),
            outcome,
        }))
    }

    fn worker_alive(&self, signal: &str) -> ActorResult<bool> {
        self.task(signal)?;
        Ok(self
            .workers
            .get(signal)
            .is_some_and(WorkerHandle::is_alive))
    }

    fn compile(&mut self) {
        while let Ok(result) = self.results_rx.try_recv() {
            debug!(actor = %self.name, signal = %result.signal, "result compiled");
            self.history.insert(result.signal, result.outcome);
        }
    }
}
