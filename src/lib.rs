//! Shadow – an actor-style task execution runtime
//!
//! This crate implements a small bot runtime:
//! - Bots (actors) own a set of signal-addressable tasks and run an event loop
//!   in their own execution context
//! - Every performed task runs on an ephemeral worker thread and reports its
//!   outcome back to the bot, failures included
//! - A registry persists bot essences so bots can be revived after a restart
//! - A line-delimited JSON protocol over TCP lets remote callers build,
//!   signal, and query bots

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core modules: actors, workers, registry, and network service
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{Runtime, ShadowConfig};
pub use runtime::actor::{Actor, ActorConfig};
pub use runtime::essence::{Essence, History};
pub use runtime::proxy::{BotHandle, Proxy, RemoteBot};
pub use runtime::registry::Registry;
pub use runtime::task::{TaskCatalog, TaskDescriptor, TaskList, TaskOutcome, TaskResult};

/// Current version of the Shadow runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for the network control protocol
pub const PROTOCOL_VERSION: &str = "1.0.0";
