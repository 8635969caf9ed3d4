//! Subscription control flow and data routing
//!
//! Run with: cargo test -p pushline-tests --test subscription_flow_test

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pushline_client::testing::{wait_for, TestServer};
use pushline_client::{ItemUpdate, Mode, PushClient, PushClientError, Subscription};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connected_client(server: &TestServer) -> PushClient {
    let client = PushClient::new(&server.base_url()).unwrap();
    client.connect("user", "secret", "DEMO").await.unwrap();
    client
}

fn quote_subscription() -> Subscription {
    Subscription::new(
        Mode::Merge,
        vec!["item1".to_string(), "item2".to_string()],
        vec!["bid".to_string(), "ask".to_string()],
    )
}

fn listening(sub: &mut Subscription) -> Arc<Mutex<Vec<ItemUpdate>>> {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    sub.add_listener(move |update| sink.lock().unwrap().push(update.clone()));
    updates
}

#[tokio::test]
async fn test_subscribe_sends_the_full_add_request() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let sub = quote_subscription().with_adapter("QUOTES");
    client.subscribe(sub).await.unwrap();

    let controls = server.control_requests();
    assert_eq!(controls.len(), 1);
    let add = &controls[0];
    assert_eq!(add.get("op").map(String::as_str), Some("add"));
    assert_eq!(add.get("table").map(String::as_str), Some("1"));
    assert_eq!(add.get("mode").map(String::as_str), Some("MERGE"));
    assert_eq!(add.get("schema").map(String::as_str), Some("bid ask"));
    assert_eq!(add.get("id").map(String::as_str), Some("item1 item2"));
    assert_eq!(add.get("snapshot").map(String::as_str), Some("true"));
    assert_eq!(add.get("data_adapter").map(String::as_str), Some("QUOTES"));
    assert_eq!(
        add.get("session").map(String::as_str),
        Some(server.session_id())
    );
}

#[tokio::test]
async fn test_snapshot_and_adapter_are_omitted_when_unset() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let sub = quote_subscription().with_snapshot(false);
    client.subscribe(sub).await.unwrap();

    let controls = server.control_requests();
    let add = &controls[0];
    assert!(!add.contains_key("snapshot"));
    assert!(!add.contains_key("data_adapter"));
}

#[tokio::test]
async fn test_keys_are_assigned_in_order() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let first = client.subscribe(quote_subscription()).await.unwrap();
    let second = client.subscribe(quote_subscription()).await.unwrap();
    let third = client.subscribe(quote_subscription()).await.unwrap();
    assert_eq!((first, second, third), (1, 2, 3));
    assert_eq!(client.active_subscriptions(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_refused_add_keeps_the_registration() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    server.set_control_response("ERROR");
    let key = client.subscribe(quote_subscription()).await.unwrap();
    assert_eq!(client.active_subscriptions(), vec![key]);
}

#[tokio::test]
async fn test_subscribe_without_session_fails() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = PushClient::new(&server.base_url()).unwrap();

    let err = client.subscribe(quote_subscription()).await.unwrap_err();
    assert!(matches!(err, PushClientError::NoSession));
}

#[tokio::test]
async fn test_unsubscribe_removes_on_confirmation() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let key = client.subscribe(quote_subscription()).await.unwrap();
    assert!(client.unsubscribe(key).await.unwrap());
    assert!(client.active_subscriptions().is_empty());

    let delete = server.control_requests().pop().unwrap();
    assert_eq!(delete.get("op").map(String::as_str), Some("delete"));
    assert_eq!(delete.get("table").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_refused_delete_keeps_the_entry() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let key = client.subscribe(quote_subscription()).await.unwrap();
    server.set_control_response("30,Unknown table");

    assert!(!client.unsubscribe(key).await.unwrap());
    assert_eq!(client.active_subscriptions(), vec![key]);
}

#[tokio::test]
async fn test_unsubscribe_unknown_key_skips_the_server() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let err = client.unsubscribe(99).await.unwrap_err();
    assert!(matches!(err, PushClientError::UnknownSubscription(99)));
    assert!(server.control_requests().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_all_clears_the_table() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    for _ in 0..3 {
        client.subscribe(quote_subscription()).await.unwrap();
    }
    let removed = client.unsubscribe_all().await.unwrap();
    assert_eq!(removed, 3);
    assert!(client.active_subscriptions().is_empty());
}

#[tokio::test]
async fn test_updates_merge_across_lines() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let mut sub = quote_subscription();
    let updates = listening(&mut sub);
    let key = client.subscribe(sub).await.unwrap();

    server.push_update(key, "1|42.1|");
    server.push_update(key, "1||42.3");
    assert!(wait_for(|| updates.lock().unwrap().len() == 2, TIMEOUT).await);

    let updates = updates.lock().unwrap();
    assert_eq!(updates[0].name, "item1");
    assert_eq!(updates[0].value("bid"), Some("42.1"));
    assert_eq!(updates[1].value("bid"), Some("42.1"));
    assert_eq!(updates[1].value("ask"), Some("42.3"));
}

#[tokio::test]
async fn test_unknown_table_is_reported_but_not_fatal() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    client.set_error_listener(move |err| sink.lock().unwrap().push(err.to_string()));

    let mut sub = quote_subscription();
    let updates = listening(&mut sub);
    let key = client.subscribe(sub).await.unwrap();

    // a stray table key is dropped; the stream keeps going
    server.push_update(9, "1|X|Y");
    server.push_update(key, "2|7.5|");
    assert!(wait_for(|| !updates.lock().unwrap().is_empty(), TIMEOUT).await);

    assert_eq!(updates.lock().unwrap()[0].name, "item2");
    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.contains("unregistered table 9")));
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_probe_and_preamble_are_ignored() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let client = connected_client(&server).await;

    let mut sub = quote_subscription();
    let updates = listening(&mut sub);
    let key = client.subscribe(sub).await.unwrap();

    server.push_line("PROBE");
    server.push_line("Preamble: stream ready");
    server.push_update(key, "1|10|20");
    assert!(wait_for(|| !updates.lock().unwrap().is_empty(), TIMEOUT).await);

    assert_eq!(updates.lock().unwrap().len(), 1);
    assert!(client.is_connected());
}
