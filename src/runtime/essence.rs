//! Essences: the persisted, transferable identity of a bot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::task::{TaskList, TaskOutcome};

/// Last outcome of every signal a bot has compiled
pub type History = BTreeMap<String, TaskOutcome>;

/// Snapshot of a bot: name, task descriptors, and compiled history
///
/// Two essences with the same `name` describe the same logical bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Essence {
    /// Bot name, unique within a registry
    pub name: String,

    /// Task descriptors keyed by signal
    pub tasks: TaskList,

    /// Compiled results keyed by signal
    #[serde(default)]
    pub history: History,
}

impl Essence {
    /// Create an essence with an empty history
    pub fn new(name: impl Into<String>, tasks: TaskList) -> Self {
        Self {
            name: name.into(),
            tasks,
            history: History::new(),
        }
    }

    /// Replace the history
    pub fn with_history(mut self, history: History) -> Self {
        self.history = history;
        self
    }
}

impl fmt::Display for Essence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] ({} compiled)",
            self.name,
            self.tasks.signals().join(", "),
            self.history.len()
        )
    }
}
