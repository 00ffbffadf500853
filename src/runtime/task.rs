//! Task descriptors, outcomes, and the task catalog
//!
//! A task descriptor binds a signal to a catalog identifier plus plain JSON
//! arguments. Only descriptors cross process or network boundaries; each side
//! resolves the identifier against its own [`TaskCatalog`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error::{ActorError, ActorResult};

/// Callable registered in the catalog
pub type TaskFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// A named signal bound to a catalog task and its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Signal under which the task is addressable
    pub signal: String,

    /// Catalog identifier of the callable
    pub task: String,

    /// Arguments bound to the callable
    #[serde(default)]
    pub args: Vec<Value>,
}

impl TaskDescriptor {
    /// Create a new descriptor
    pub fn new(signal: impl Into<String>, task: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            signal: signal.into(),
            task: task.into(),
            args,
        }
    }
}

/// Ordered set of task descriptors keyed by signal
///
/// Descriptors are immutable once assigned: adding a signal that already
/// exists keeps the original descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<TaskDescriptor>", into = "Vec<TaskDescriptor>")]
pub struct TaskList {
    tasks: BTreeMap<String, TaskDescriptor>,
}

impl TaskList {
    /// Create an empty task list
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style add
    pub fn with(mut self, signal: &str, task: &str, args: Vec<Value>) -> Self {
        self.add(TaskDescriptor::new(signal, task, args));
        self
    }

    /// Add a descriptor, returning false if its signal is already taken
    pub fn add(&mut self, descriptor: TaskDescriptor) -> bool {
        if self.tasks.contains_key(&descriptor.signal) {
            return false;
        }
        self.tasks.insert(descriptor.signal.clone(), descriptor);
        true
    }

    /// Remove the descriptor bound to a signal
    pub fn remove(&mut self, signal: &str) -> Option<TaskDescriptor> {
        self.tasks.remove(signal)
    }

    /// Check whether a signal is bound
    pub fn contains(&self, signal: &str) -> bool {
        self.tasks.contains_key(signal)
    }

    /// Get the descriptor bound to a signal
    pub fn get(&self, signal: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(signal)
    }

    /// Signals in order
    pub fn signals(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Iterate over descriptors in signal order
    pub fn iter(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.values()
    }

    /// Number of bound signals
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no signal is bound
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl From<Vec<TaskDescriptor>> for TaskList {
    fn from(descriptors: Vec<TaskDescriptor>) -> Self {
        descriptors.into_iter().collect()
    }
}

impl From<TaskList> for Vec<TaskDescriptor> {
    fn from(list: TaskList) -> Self {
        list.tasks.into_values().collect()
    }
}

impl FromIterator<TaskDescriptor> for TaskList {
    fn from_iter<I: IntoIterator<Item = TaskDescriptor>>(iter: I) -> Self {
        let mut list = TaskList::new();
        for descriptor in iter {
            list.add(descriptor);
        }
        list
    }
}

/// Outcome of one task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The callable returned a value
    Completed {
        /// Returned value
        value: Value,
    },
    /// The callable returned an error or panicked
    Failed {
        /// Rendered failure cause
        cause: String,
    },
}

impl TaskOutcome {
    /// Returned value, if the task completed
    pub fn value(&self) -> Option<&Value> {
        match self {
            TaskOutcome::Completed { value } => Some(value),
            TaskOutcome::Failed { .. } => None,
        }
    }

    /// Whether the task failed
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }
}

/// `(signal, outcome)` pair deposited by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Signal the outcome belongs to
    pub signal: String,
    /// Outcome of the invocation
    pub outcome: TaskOutcome,
}

/// A descriptor resolved against a catalog, ready to run
#[derive(Clone)]
pub struct BoundTask {
    descriptor: TaskDescriptor,
    func: TaskFn,
}

impl BoundTask {
    /// Signal this task is bound to
    pub fn signal(&self) -> &str {
        &self.descriptor.signal
    }

    /// Underlying descriptor
    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// Run the callable with its bound arguments on the current thread
    pub fn invoke(&self) -> anyhow::Result<Value> {
        (self.func)(&self.descriptor.args)
    }
}

impl fmt::Debug for BoundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTask")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Statically registered catalog of task callables
///
/// Constructed once at process start and shared by handle; there is no
/// global instance.
#[derive(Clone, Default)]
pub struct TaskCatalog {
    tasks: HashMap<String, TaskFn>,
}

impl TaskCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding the builtin tasks (`true`, `sleep`, `sum`, `echo`)
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("true", |_args| Ok(Value::Bool(true)));
        catalog.register("sleep", builtin_sleep);
        catalog.register("sum", builtin_sum);
        catalog.register("echo", builtin_echo);
        catalog
    }

    /// Register a callable under a stable identifier, replacing any previous one
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.tasks.insert(name.to_string(), Arc::new(func));
    }

    /// Check whether the catalog provides an identifier
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Sorted list of identifiers
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a descriptor into a runnable task
    pub fn bind(&self, descriptor: &TaskDescriptor) -> ActorResult<BoundTask> {
        let func = self
            .tasks
            .get(&descriptor.task)
            .cloned()
            .ok_or_else(|| ActorError::UnknownTask {
                signal: descriptor.signal.clone(),
                task: descriptor.task.clone(),
            })?;

        Ok(BoundTask {
            descriptor: descriptor.clone(),
            func,
        })
    }

    /// Resolve every descriptor of a task list, keyed by signal
    pub fn bind_all(&self, tasks: &TaskList) -> ActorResult<HashMap<String, BoundTask>> {
        tasks
            .iter()
            .map(|descriptor| Ok((descriptor.signal.clone(), self.bind(descriptor)?)))
            .collect()
    }
}

impl fmt::Debug for TaskCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCatalog")
            .field("tasks", &self.names())
            .finish()
    }
}

fn builtin_sleep(args: &[Value]) -> anyhow::Result<Value> {
    let seconds = match args.first() {
        Some(value) => value
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("sleep expects a number of seconds, got {value}"))?,
        None => 1.0,
    };
    if !seconds.is_finite() || seconds < 0.0 {
        anyhow::bail!("sleep duration must be a non-negative number, got {seconds}");
    }

    std::thread::sleep(Duration::from_secs_f64(seconds));
    Ok(Value::Bool(true))
}

fn builtin_sum(args: &[Value]) -> anyhow::Result<Value> {
    if args.iter().all(|arg| arg.is_i64()) {
        let mut total: i64 = 0;
        for arg in args {
            let n = arg.as_i64().unwrap_or_default();
            total = total
                .checked_add(n)
                .ok_or_else(|| anyhow::anyhow!("integer overflow in sum"))?;
        }
        return Ok(Value::from(total));
    }

    let mut total = 0.0;
    for arg in args {
        total += arg
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("sum expects numbers, got {arg}"))?;
    }
    Ok(Value::from(total))
}

fn builtin_echo(args: &[Value]) -> anyhow::Result<Value> {
    Ok(match args {
        [single] => single.clone(),
        many => Value::Array(many.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_sum() {
        let catalog = TaskCatalog::with_builtins();
        let task = catalog
            .bind(&TaskDescriptor::new("sum", "sum", vec![json!(1), json!(1)]))
            .unwrap();
        assert_eq!(task.invoke().unwrap(), json!(2));

        let floats = catalog
            .bind(&TaskDescriptor::new("sum", "sum", vec![json!(1), json!(0.5)]))
            .unwrap();
        assert_eq!(floats.invoke().unwrap(), json!(1.5));

        let bad = catalog
            .bind(&TaskDescriptor::new("sum", "sum", vec![json!("x")]))
            .unwrap();
        assert!(bad.invoke().is_err());
    }

    #[test]
    fn test_builtin_echo() {
        let catalog = TaskCatalog::with_builtins();
        let single = catalog
            .bind(&TaskDescriptor::new("echo", "echo", vec![json!("hi")]))
            .unwrap();
        assert_eq!(single.invoke().unwrap(), json!("hi"));

        let many = catalog
            .bind(&TaskDescriptor::new("echo", "echo", vec![json!(1), json!("a")]))
            .unwrap();
        assert_eq!(many.invoke().unwrap(), json!([1, "a"]));
    }

    #[test]
    fn test_builtin_sleep_rejects_negative() {
        let catalog = TaskCatalog::with_builtins();
        let task = catalog
            .bind(&TaskDescriptor::new("nap", "sleep", vec![json!(-1)]))
            .unwrap();
        assert!(task.invoke().is_err());

        let quick = catalog
            .bind(&TaskDescriptor::new("nap", "sleep", vec![json!(0.01)]))
            .unwrap();
        assert_eq!(quick.invoke().unwrap(), json!(true));
    }

    #[test]
    fn test_bind_unknown_task() {
        let catalog = TaskCatalog::with_builtins();
        let err = catalog
            .bind(&TaskDescriptor::new("go", "teleport", vec![]))
            .unwrap_err();
        assert_eq!(
            err,
            ActorError::UnknownTask {
                signal: "go".into(),
                task: "teleport".into()
            }
        );
    }

    #[test]
    fn test_task_list_first_wins() {
        let mut tasks = TaskList::new().with("sum", "sum", vec![json!(1)]);
        assert!(!tasks.add(TaskDescriptor::new("sum", "echo", vec![])));
        assert_eq!(tasks.get("sum").unwrap().task, "sum");

        assert!(tasks.remove("sum").is_some());
        assert!(!tasks.contains("sum"));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_task_list_serializes_as_sequence() {
        let tasks = TaskList::new()
            .with("sum", "sum", vec![json!(1), json!(1)])
            .with("echo", "echo", vec![json!("x")]);

        let value = serde_json::to_value(&tasks).unwrap();
        assert_eq!(
            value,
            json!([
                {"signal": "echo", "task": "echo", "args": ["x"]},
                {"signal": "sum", "task": "sum", "args": [1, 1]},
            ])
        );

        let parsed: TaskList =
            serde_json::from_value(json!([{"signal": "t", "task": "true"}])).unwrap();
        assert_eq!(parsed.signals(), vec!["t".to_string()]);
        assert!(parsed.get("t").unwrap().args.is_empty());
    }

    #[test]
    fn test_outcome_wire_shape() {
        let done = TaskOutcome::Completed { value: json!(2) };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"status": "completed", "value": 2})
        );
        assert_eq!(done.value(), Some(&json!(2)));

        let failed = TaskOutcome::Failed { cause: "boom".into() };
        assert!(failed.is_failure());
        assert_eq!(failed.value(), None);
    }
}
