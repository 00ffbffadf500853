//! Caller-side handles to bots
//!
//! [`BotHandle`] is the single capability interface for driving a bot. It is
//! implemented by the local [`Actor`] and by [`RemoteBot`], which reaches a bot
//! hosted by a network service. [`Proxy`] wraps either with a scoped lifecycle
//! and turns rejected calls into sentinels instead of errors.

use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

use super::actor::Actor;
use super::error::{ActorError, ActorResult};
use super::essence::{Essence, History};
use super::protocol::{ErrorBody, SignalEvent, Tag};
use super::service_client::ServiceClient;
use super::task::{TaskOutcome, TaskResult};

/// Operations every bot handle supports
pub trait BotHandle: Send + Sync {
    /// Bot name
    fn name(&self) -> &str;

    /// Start the bot
    fn start(&self) -> impl Future<Output = ActorResult<()>> + Send;

    /// Stop the bot; a no-op when it is not running
    fn stop(&self) -> impl Future<Output = ActorResult<()>> + Send;

    /// Whether the bot is running
    fn alive(&self) -> impl Future<Output = bool> + Send;

    /// Spawn a worker for `signal`
    fn perform(&self, signal: &str) -> impl Future<Output = ActorResult<()>> + Send;

    /// Join the worker for `signal`
    fn wait(&self, signal: &str) -> impl Future<Output = ActorResult<()>> + Send;

    /// Last compiled outcome for `signal`
    fn result(&self, signal: &str) -> impl Future<Output = ActorResult<Option<TaskOutcome>>> + Send;

    /// Perform, wait and fetch `signal` in one round trip
    fn jutsu(&self, signal: &str) -> impl Future<Output = ActorResult<Option<TaskResult>>> + Send;

    /// Essence projection
    fn essence(&self) -> impl Future<Output = ActorResult<Essence>> + Send;
}

impl BotHandle for Actor {
    fn name(&self) -> &str {
        Actor::name(self)
    }

    async fn start(&self) -> ActorResult<()> {
        Actor::start(self)
    }

    async fn stop(&self) -> ActorResult<()> {
        Actor::stop(self).await
    }

    async fn alive(&self) -> bool {
        Actor::alive(self)
    }

    async fn perform(&self, signal: &str) -> ActorResult<()> {
        Actor::perform(self, signal).await
    }

    async fn wait(&self, signal: &str) -> ActorResult<()> {
        Actor::wait(self, signal).await
    }

    async fn result(&self, signal: &str) -> ActorResult<Option<TaskOutcome>> {
        Actor::result(self, signal).await
    }

    async fn jutsu(&self, signal: &str) -> ActorResult<Option<TaskResult>> {
        Actor::jutsu(self, signal).await
    }

    async fn essence(&self) -> ActorResult<Essence> {
        Actor::essence(self).await
    }
}

/// Lifecycle wrapper around a bot handle
///
/// `enter` starts the bot unless `keep_alive` is set and it already runs;
/// `exit` stops it unless `keep_alive` is set. Calls on a bot that is not
/// running are rejected locally and yield `false`/`None`.
#[derive(Debug)]
pub struct Proxy<B> {
    bot: B,
    keep_alive: bool,
}

impl<B: BotHandle> Proxy<B> {
    /// Wrap a bot handle
    pub fn new(bot: B, keep_alive: bool) -> Self {
        Self { bot, keep_alive }
    }

    /// Underlying handle
    pub fn bot(&self) -> &B {
        &self.bot
    }

    /// Unwrap the handle
    pub fn into_inner(self) -> B {
        self.bot
    }

    /// Whether exit leaves the bot running
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Start the bot for a scope
    pub async fn enter(&self) -> ActorResult<()> {
        if self.keep_alive && self.bot.alive().await {
            debug!(bot = self.bot.name(), "keep-alive set and already running");
            return Ok(());
        }
        self.bot.start().await
    }

    /// Leave a scope, stopping the bot unless `keep_alive` is set
    pub async fn exit(&self) -> ActorResult<()> {
        if self.keep_alive {
            debug!(bot = self.bot.name(), "keep-alive set, leaving running");
            return Ok(());
        }
        self.bot.stop().await
    }

    /// Run `body` between `enter` and `exit`
    pub async fn scoped<T>(&self, body: impl AsyncFnOnce(&Self) -> T) -> ActorResult<T> {
        self.enter().await?;
        let value = body(self).await;
        self.exit().await?;
        Ok(value)
    }

    /// Whether the bot is running
    pub async fn alive(&self) -> bool {
        self.bot.alive().await
    }

    /// Spawn a worker for `signal`
    pub async fn perform(&self, signal: &str) -> bool {
        if !self.running("perform").await {
            return false;
        }
        self.settle(signal, self.bot.perform(signal).await).is_some()
    }

    /// Join the worker for `signal`
    pub async fn wait(&self, signal: &str) -> bool {
        if !self.running("wait").await {
            return false;
        }
        self.settle(signal, self.bot.wait(signal).await).is_some()
    }

    /// Last compiled outcome for `signal`
    pub async fn result(&self, signal: &str) -> Option<TaskOutcome> {
        if !self.running("result").await {
            return None;
        }
        self.settle(signal, self.bot.result(signal).await).flatten()
    }

    /// Perform, wait and fetch `signal` in one round trip
    pub async fn jutsu(&self, signal: &str) -> Option<TaskResult> {
        if !self.running("jutsu").await {
            return None;
        }
        self.settle(signal, self.bot.jutsu(signal).await).flatten()
    }

    /// Essence projection
    pub async fn essence(&self) -> Option<Essence> {
        if !self.running("essence").await {
            return None;
        }
        self.settle("essence", self.bot.essence().await)
    }

    /// Stop the bot; returns false when it was not running
    pub async fn kill(&self) -> bool {
        if !self.running("kill").await {
            return false;
        }
        self.settle("kill", self.bot.stop().await).is_some()
    }

    async fn running(&self, call: &str) -> bool {
        let alive = self.bot.alive().await;
        if !alive {
            warn!(bot = self.bot.name(), call, "not running, call rejected");
        }
        alive
    }

    fn settle<T>(&self, what: &str, result: ActorResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(bot = self.bot.name(), what, kind = err.kind(), "{err}");
                None
            }
        }
    }
}

/// Bot hosted by a remote service, addressed by name
#[derive(Debug, Clone)]
pub struct RemoteBot {
    name: String,
    client: ServiceClient,
}

impl RemoteBot {
    /// Address the bot `name` through `client`
    pub fn new(name: impl Into<String>, client: ServiceClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// Client used for every call
    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    /// Compiled history of the remote bot
    pub async fn compile(&self) -> ActorResult<History> {
        let value = self.call(SignalEvent::Compile, None).await?;
        decode(value)
    }

    async fn call(&self, event: SignalEvent, task: Option<&str>) -> ActorResult<Value> {
        let response = self
            .client
            .signal(&self.name, event, task)
            .await
            .map_err(|err| ActorError::Transport(err.to_string()))?;

        match response.tag {
            Tag::Signal => Ok(response
                .data
                .and_then(|mut data| data.get_mut("result").map(Value::take))
                .unwrap_or(Value::Null)),
            Tag::Error => {
                let ErrorBody { kind, message } = response.error_body().ok_or_else(|| {
                    ActorError::Transport("error response without a body".to_string())
                })?;
                Err(match kind.as_str() {
                    "not_alive" => ActorError::NotAlive(self.name.clone()),
                    _ => ActorError::Remote { kind, message },
                })
            }
            other => Err(ActorError::Transport(format!("unexpected response tag {other}"))),
        }
    }

    async fn task_result(&self, event: SignalEvent, signal: &str) -> ActorResult<Option<TaskResult>> {
        let value = self.call(event, Some(signal)).await?;
        if value.is_null() {
            return Ok(None);
        }

        let (signal, outcome): (String, TaskOutcome) = decode(value)?;
        Ok(Some(TaskResult { signal, outcome }))
    }
}

impl BotHandle for RemoteBot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> ActorResult<()> {
        self.call(SignalEvent::Start, None).await.map(|_| ())
    }

    async fn stop(&self) -> ActorResult<()> {
        match self.call(SignalEvent::Kill, None).await {
            Ok(_) | Err(ActorError::NotAlive(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn alive(&self) -> bool {
        match self.call(SignalEvent::Status, None).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(ActorError::NotAlive(_)) => false,
            Err(err) => {
                warn!(bot = %self.name, "status failed: {err}");
                false
            }
        }
    }

    async fn perform(&self, signal: &str) -> ActorResult<()> {
        self.call(SignalEvent::Perform, Some(signal)).await.map(|_| ())
    }

    async fn wait(&self, signal: &str) -> ActorResult<()> {
        self.call(SignalEvent::Wait, Some(signal)).await.map(|_| ())
    }

    async fn result(&self, signal: &str) -> ActorResult<Option<TaskOutcome>> {
        let result = self.task_result(SignalEvent::Result, signal).await?;
        Ok(result.map(|result| result.outcome))
    }

    async fn jutsu(&self, signal: &str) -> ActorResult<Option<TaskResult>> {
        self.task_result(SignalEvent::Jutsu, signal).await
    }

    async fn essence(&self) -> ActorResult<Essence> {
        let value = self.call(SignalEvent::Essence, None).await?;
        decode(value)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> ActorResult<T> {
    serde_json::from_value(value).map_err(|err| ActorError::Transport(format!("malformed result: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::actor::ActorConfig;
    use crate::runtime::task::{TaskCatalog, TaskList};
    use serde_json::json;

    fn actor() -> Actor {
        Actor::new(
            Essence::new("P", TaskList::new().with("sum", "sum", vec![json!(2), json!(2)])),
            &TaskCatalog::with_builtins(),
            ActorConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_calls_rejected_when_not_running() {
        let proxy = Proxy::new(actor(), false);

        assert!(!proxy.perform("sum").await);
        assert!(!proxy.wait("sum").await);
        assert_eq!(proxy.result("sum").await, None);
        assert_eq!(proxy.jutsu("sum").await, None);
        assert_eq!(proxy.essence().await, None);
        assert!(!proxy.kill().await);
    }

    #[tokio::test]
    async fn test_scoped_lifecycle() {
        let proxy = Proxy::new(actor(), false);

        let result = proxy
            .scoped(async |proxy: &Proxy<Actor>| proxy.jutsu("sum").await)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, TaskOutcome::Completed { value: json!(4) });
        assert!(!proxy.alive().await);
    }

    #[tokio::test]
    async fn test_keep_alive() {
        let proxy = Proxy::new(actor(), true);

        proxy.enter().await.unwrap();
        assert!(proxy.alive().await);
        proxy.exit().await.unwrap();
        assert!(proxy.alive().await);

        // A second enter leaves the running bot alone.
        proxy.enter().await.unwrap();
        assert!(proxy.kill().await);
        assert!(!proxy.alive().await);
    }
}
