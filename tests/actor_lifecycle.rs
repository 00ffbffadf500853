//! Actor lifecycle and event loop tests
//!
//! Covers start/stop, perform/wait/result, failure capture, concurrent
//! workers, and the ordering contract of a blocking `wait`.

use serde_json::json;
use shadow::runtime::actor::ActorState;
use shadow::runtime::error::ActorError;
use shadow::runtime::task::TaskDescriptor;
use shadow::{Actor, ActorConfig, Essence, TaskCatalog, TaskList, TaskOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn catalog() -> TaskCatalog {
    let mut catalog = TaskCatalog::with_builtins();
    catalog.register("fail", |_args| Err(anyhow::anyhow!("deliberate failure")));
    catalog
}

fn bot(name: &str, tasks: TaskList) -> Actor {
    Actor::new(Essence::new(name, tasks), &catalog(), ActorConfig::default()).unwrap()
}

#[tokio::test]
async fn echo_matches_direct_invocation() {
    let catalog = catalog();
    let descriptor = TaskDescriptor::new("echo", "echo", vec![json!("hello")]);
    let direct = catalog.bind(&descriptor).unwrap().invoke().unwrap();

    let actor = bot("Echo", TaskList::from(vec![descriptor]));
    actor.start().unwrap();

    actor.perform("echo").await.unwrap();
    actor.wait("echo").await.unwrap();
    let outcome = actor.result("echo").await.unwrap();

    assert_eq!(outcome, Some(TaskOutcome::Completed { value: direct }));
    actor.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_signal_leaves_state_untouched() {
    let actor = bot("T", TaskList::new().with("sum", "sum", vec![json!(1), json!(1)]));
    actor.start().unwrap();

    let err = actor.perform("nope").await.unwrap_err();
    assert_eq!(
        err,
        ActorError::TaskNotFound {
            actor: "T".into(),
            signal: "nope".into()
        }
    );

    assert!(actor.alive());
    assert!(actor.compile().await.unwrap().is_empty());
    assert_eq!(
        actor.wait("sum").await.unwrap_err(),
        ActorError::NotPerformed("sum".into())
    );

    actor.stop().await.unwrap();
}

#[tokio::test]
async fn kill_is_noop_when_stopped() {
    let actor = bot("Idle", TaskList::new().with("t", "true", vec![]));

    actor.stop().await.unwrap();
    assert_eq!(actor.state(), ActorState::Off);

    actor.start().unwrap();
    assert!(actor.alive());

    let started = Instant::now();
    actor.stop().await.unwrap();
    assert!(!actor.alive());
    assert!(started.elapsed() < actor.config().request_timeout);
}

#[tokio::test]
async fn failing_task_keeps_actor_alive() {
    let actor = bot(
        "Fragile",
        TaskList::new()
            .with("fail", "fail", vec![])
            .with("sum", "sum", vec![json!(1), json!(1)]),
    );
    actor.start().unwrap();

    let result = actor.jutsu("fail").await.unwrap().unwrap();
    assert_eq!(result.signal, "fail");
    assert_eq!(
        result.outcome,
        TaskOutcome::Failed {
            cause: "deliberate failure".into()
        }
    );
    assert!(actor.alive());

    let result = actor.jutsu("sum").await.unwrap().unwrap();
    assert_eq!(result.outcome, TaskOutcome::Completed { value: json!(2) });

    actor.stop().await.unwrap();
}

#[tokio::test]
async fn nul_bytes_in_names_do_not_break_threads() {
    let actor = bot(
        "N\0ul",
        TaskList::new()
            .with("a\0b", "true", vec![])
            .with("t", "true", vec![]),
    );
    actor.start().unwrap();
    assert!(actor.alive());

    let result = actor.jutsu("a\0b").await.unwrap().unwrap();
    assert_eq!(result.signal, "a\0b");
    assert_eq!(result.outcome, TaskOutcome::Completed { value: json!(true) });

    assert!(actor.alive());
    actor.perform("t").await.unwrap();
    actor.wait("t").await.unwrap();

    actor.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_workers_do_not_cross_talk() {
    let actor = bot(
        "Busy",
        TaskList::new()
            .with("sleep", "sleep", vec![json!(0.3)])
            .with("sum", "sum", vec![json!(1), json!(1)]),
    );
    actor.start().unwrap();

    actor.perform("sleep").await.unwrap();
    actor.perform("sum").await.unwrap();
    assert!(actor.worker_alive("sleep").await.unwrap());

    actor.wait("sleep").await.unwrap();
    actor.wait("sum").await.unwrap();

    assert_eq!(
        actor.result("sleep").await.unwrap(),
        Some(TaskOutcome::Completed { value: json!(true) })
    );
    assert_eq!(
        actor.result("sum").await.unwrap(),
        Some(TaskOutcome::Completed { value: json!(2) })
    );

    actor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_blocks_requests_queued_behind_it() {
    let actor = Arc::new(bot("Fifo", TaskList::new().with("nap", "sleep", vec![json!(0.4)])));
    actor.start().unwrap();
    actor.perform("nap").await.unwrap();

    let waiter = {
        let actor = actor.clone();
        tokio::spawn(async move { actor.wait("nap").await })
    };

    // Let the wait reach the loop before the compile request.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let history = actor.compile().await.unwrap();
    assert_eq!(
        history.get("nap"),
        Some(&TaskOutcome::Completed { value: json!(true) }),
        "compile was handled before the queued wait finished"
    );

    waiter.await.unwrap().unwrap();
    actor.stop().await.unwrap();
}

#[tokio::test]
async fn wait_timeout_keeps_actor_alive() {
    let config = ActorConfig {
        wait_timeout: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
    };
    let actor = Actor::new(
        Essence::new("Slow", TaskList::new().with("nap", "sleep", vec![json!(0.3)])),
        &catalog(),
        config,
    )
    .unwrap();
    actor.start().unwrap();

    actor.perform("nap").await.unwrap();
    let err = actor.wait("nap").await.unwrap_err();
    assert_eq!(
        err,
        ActorError::WorkerTimeout {
            signal: "nap".into(),
            timeout_ms: 50
        }
    );
    assert!(actor.alive());
    assert!(actor.worker_alive("nap").await.unwrap());

    // The handle survives the timeout and can be joined once the task is done.
    tokio::time::sleep(Duration::from_millis(400)).await;
    actor.wait("nap").await.unwrap();
    assert_eq!(
        actor.result("nap").await.unwrap(),
        Some(TaskOutcome::Completed { value: json!(true) })
    );

    actor.stop().await.unwrap();
}

#[tokio::test]
async fn history_survives_restart() {
    let actor = bot("Phoenix", TaskList::new().with("sum", "sum", vec![json!(20), json!(22)]));
    actor.start().unwrap();
    actor.jutsu("sum").await.unwrap();

    actor.restart().await.unwrap();
    assert!(actor.alive());
    let essence = actor.essence().await.unwrap();
    assert_eq!(
        essence.history.get("sum"),
        Some(&TaskOutcome::Completed { value: json!(42) })
    );

    actor.stop().await.unwrap();
    let essence = actor.essence().await.unwrap();
    assert_eq!(essence.name, "Phoenix");
    assert_eq!(essence.history.len(), 1);
    assert_eq!(essence.tasks.signals(), vec!["sum".to_string()]);
}
