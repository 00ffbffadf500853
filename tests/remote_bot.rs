//! Proxy tests over a bot hosted by the network service

use serde_json::json;
use shadow::runtime::error::ActorError;
use shadow::runtime::service_client::ServiceClient;
use shadow::{BotHandle, Proxy, RemoteBot, Runtime, ShadowConfig, TaskCatalog, TaskList, TaskOutcome};
use std::time::Duration;
use tempfile::TempDir;

async fn remote(temp: &TempDir, name: &str, tasks: TaskList) -> RemoteBot {
    let config = ShadowConfig {
        root: temp.path().to_path_buf(),
        port: 0,
        ..ShadowConfig::default()
    };
    let runtime = Runtime::new(config, TaskCatalog::with_builtins()).unwrap();
    let server = runtime.bind().await.unwrap();
    let client =
        ServiceClient::new(server.local_addr().unwrap().to_string()).with_timeout(Duration::from_secs(10));
    tokio::spawn(server.serve());

    client.build(name, tasks).await.unwrap();
    RemoteBot::new(name, client)
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_scopes_remote_bot() {
    let temp = TempDir::new().unwrap();
    let bot = remote(&temp, "R", TaskList::new().with("sum", "sum", vec![json!(5), json!(6)])).await;
    let proxy = Proxy::new(bot, false);

    assert!(!proxy.alive().await);
    assert!(!proxy.perform("sum").await);

    let (result, essence) = proxy
        .scoped(async |proxy: &Proxy<RemoteBot>| {
            let result = proxy.jutsu("sum").await;
            (result, proxy.essence().await)
        })
        .await
        .unwrap();
    let result = result.unwrap();
    assert_eq!(result.signal, "sum");
    assert_eq!(result.outcome, TaskOutcome::Completed { value: json!(11) });
    assert_eq!(essence.unwrap().history.get("sum"), Some(&result.outcome));

    assert!(!proxy.alive().await);
    assert_eq!(proxy.essence().await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_errors_map_back_to_actor_errors() {
    let temp = TempDir::new().unwrap();
    let bot = remote(&temp, "R", TaskList::new().with("t", "true", vec![])).await;

    assert_eq!(bot.perform("t").await.unwrap_err(), ActorError::NotAlive("R".into()));

    bot.start().await.unwrap();
    assert!(bot.alive().await);

    let err = bot.perform("missing").await.unwrap_err();
    assert_eq!(err.kind(), "task_not_found");

    bot.perform("t").await.unwrap();
    bot.wait("t").await.unwrap();
    assert_eq!(
        bot.result("t").await.unwrap(),
        Some(TaskOutcome::Completed { value: json!(true) })
    );
    assert_eq!(bot.compile().await.unwrap().len(), 1);

    bot.stop().await.unwrap();
    assert!(!bot.alive().await);
    // Stopping again is a no-op.
    bot.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_alive_leaves_remote_bot_running() {
    let temp = TempDir::new().unwrap();
    let bot = remote(&temp, "K", TaskList::new().with("t", "true", vec![])).await;
    let proxy = Proxy::new(bot, true);

    proxy.enter().await.unwrap();
    proxy.exit().await.unwrap();
    assert!(proxy.alive().await);

    assert!(proxy.kill().await);
    assert!(!proxy.alive().await);
}
