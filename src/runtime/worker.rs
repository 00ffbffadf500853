//! Ephemeral workers
//!
//! A worker runs exactly one task invocation on its own OS thread and deposits
//! a [`TaskResult`] on the owning actor's result channel. Errors and panics
//! raised by the callable are captured and reported as
//! [`TaskOutcome::Failed`]; they never unwind into the actor.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{ActorError, ActorResult};
use super::task::{BoundTask, TaskOutcome, TaskResult};

/// Handle to a spawned worker
#[derive(Debug)]
pub struct WorkerHandle {
    signal: String,
    run_id: Uuid,
    thread: JoinHandle<()>,
    done: watch::Receiver<bool>,
}

impl WorkerHandle {
    /// Spawn a worker for `task`, reporting to `results`
    pub fn spawn(task: BoundTask, results: mpsc::UnboundedSender<TaskResult>) -> ActorResult<Self> {
        let signal = task.signal().to_string();
        let run_id = Uuid::new_v4();
        let (done_tx, done_rx) = watch::channel(false);

        let thread = thread::Builder::new()
            .name(thread_name("worker", &signal))
            .spawn(move || {
                debug!(signal = task.signal(), %run_id, "performing task");
                let outcome = execute(&task);

                let result = TaskResult {
                    signal: task.signal().to_string(),
                    outcome,
                };
                if results.send(result).is_err() {
                    debug!(signal = task.signal(), %run_id, "result channel closed, dropping result");
                }

                // Published after the result so a successful join implies the
                // result is already queued.
                let _ = done_tx.send(true);
            })
            .map_err(|err| ActorError::Spawn(err.to_string()))?;

        Ok(Self {
            signal,
            run_id,
            thread,
            done: done_rx,
        })
    }

    /// Signal this worker is running
    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Unique identifier of this invocation
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Whether the worker thread is still executing
    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Wait up to `timeout` for the task to finish
    pub async fn join(&self, timeout: Duration) -> ActorResult<()> {
        let mut done = self.done.clone();
        let finished = tokio::time::timeout(timeout, async move {
            // A closed channel means the thread is gone, which also counts as finished.
            let _ = done.wait_for(|finished| *finished).await;
        })
        .await;

        finished.map_err(|_| ActorError::WorkerTimeout {
            signal: self.signal.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

/// OS thread name for `prefix` and a user-supplied `name`
///
/// Thread names may not contain NUL bytes, so those are dropped.
pub(crate) fn thread_name(prefix: &str, name: &str) -> String {
    let name: String = name.chars().filter(|c| *c != '\0').collect();
    format!("{prefix}-{name}")
}

fn execute(task: &BoundTask) -> TaskOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| task.invoke())) {
        Ok(Ok(value)) => TaskOutcome::Completed { value },
        Ok(Err(err)) => {
            warn!(signal = task.signal(), "task failed: {err:#}");
            TaskOutcome::Failed {
                cause: format!("{err:#}"),
            }
        }
        Err(payload) => {
            let cause = panic_message(payload.as_ref());
            warn!(signal = task.signal(), "task panicked: {cause}");
            TaskOutcome::Failed { cause }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
