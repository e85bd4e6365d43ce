//! Subscription behaviour over a live (mock) connection

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{accept, connected, mock_session};
use kilovolt_client::{ClientConfig, KilovoltError};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

type Seen = Arc<Mutex<Vec<(String, String)>>>;

fn recorder() -> (Seen, impl Fn(&str, &str) + Send + Sync + 'static) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    (seen, move |key: &str, value: &str| {
        s.lock().push((key.to_string(), value.to_string()));
    })
}

#[tokio::test]
async fn test_exact_key_push_dispatch() {
    let (session, mut server) = connected(ClientConfig::default()).await;
    let (seen, listener) = recorder();

    let (id, request) = tokio::join!(session.subscribe("twitch/chat", listener), async {
        let request = server.expect("ksub").await;
        server.reply_ok(&request, json!(null));
        request
    });
    id.unwrap();
    assert_eq!(request["data"], json!({"key": "twitch/chat"}));

    // A round trip after the pushes guarantees they were processed
    let (_, _) = tokio::join!(session.list(""), async {
        server.push("twitch/chat", "hello");
        server.push("twitch/other", "nope");
        let request = server.expect("klist").await;
        server.reply_ok(&request, json!([]));
    });

    assert_eq!(
        *seen.lock(),
        vec![("twitch/chat".to_string(), "hello".to_string())]
    );
}

#[tokio::test]
async fn test_prefix_push_dispatch() {
    let (session, mut server) = connected(ClientConfig::default()).await;
    let (seen, listener) = recorder();

    let (id, request) = tokio::join!(session.subscribe_prefix("twitch", listener), async {
        let request = server.expect("ksub-prefix").await;
        server.reply_ok(&request, json!(null));
        request
    });
    id.unwrap();
    assert_eq!(request["data"], json!({"prefix": "twitch"}));

    let (_, _) = tokio::join!(session.list(""), async {
        server.push("twitch/chat", "1");
        server.push("twitch/alerts", "2");
        server.push("other/key", "3");
        let request = server.expect("klist").await;
        server.reply_ok(&request, json!([]));
    });

    let keys: Vec<String> = seen.lock().iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, vec!["twitch/chat", "twitch/alerts"]);
}

#[tokio::test]
async fn test_reference_counted_subscribe_and_unsubscribe() {
    let (session, mut server) = connected(ClientConfig::default()).await;
    let (_, first) = recorder();
    let (_, second) = recorder();

    let (a, _) = tokio::join!(session.subscribe("shared", first), async {
        let request = server.expect("ksub").await;
        server.reply_ok(&request, json!(null));
    });
    // Second listener is local only
    let b = session.subscribe("shared", second).await;
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(!server.has_pending_frame());

    session.unsubscribe("shared", a).await.unwrap();
    assert!(!server.has_pending_frame());

    let (result, request) = tokio::join!(session.unsubscribe("shared", b), async {
        let request = server.expect("kunsub").await;
        server.reply_ok(&request, json!(null));
        request
    });
    result.unwrap();
    assert_eq!(request["data"], json!({"key": "shared"}));
    assert!(!server.has_pending_frame());
}

#[tokio::test]
async fn test_unsubscribe_unknown_pattern_sends_nothing() {
    let (session, mut server) = connected(ClientConfig::default()).await;
    let (_, listener) = recorder();

    let (id, _) = tokio::join!(session.subscribe_prefix("a/", listener), async {
        let request = server.expect("ksub-prefix").await;
        server.reply_ok(&request, json!(null));
    });
    let id = id.unwrap();

    // Registered under the prefix registry, not the exact-key one
    let err = session.unsubscribe("a/", id).await.unwrap_err();
    assert!(matches!(err, KilovoltError::NotSubscribed(_)));
    let err = session.unsubscribe_prefix("never", id).await.unwrap_err();
    assert!(matches!(err, KilovoltError::NotSubscribed(_)));
    assert!(!server.has_pending_frame());
}

#[tokio::test]
async fn test_rejected_subscribe_is_not_registered() {
    let (session, mut server) = connected(ClientConfig::default()).await;
    let (seen, listener) = recorder();

    let (result, _) = tokio::join!(session.subscribe("secret", listener), async {
        let request = server.expect("ksub").await;
        server.reply_err(&request, "forbidden");
    });
    assert!(matches!(
        result.unwrap_err(),
        KilovoltError::CommandFailed { .. }
    ));

    // The next subscribe to the same key must go to the server again
    let (_, second) = recorder();
    let (retry, _) = tokio::join!(session.subscribe("secret", second), async {
        let request = server.expect("ksub").await;
        server.reply_ok(&request, json!(null));
    });
    retry.unwrap();
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_listener_may_forward_to_channel() {
    let (session, mut server) = connected(ClientConfig::default()).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let (id, _) = tokio::join!(
        session.subscribe_prefix("", move |key, value| {
            let _ = tx.send(format!("{}={}", key, value));
        }),
        async {
            let request = server.expect("ksub-prefix").await;
            server.reply_ok(&request, json!(null));
        }
    );
    id.unwrap();

    server.push("x", "1");
    assert_eq!(rx.recv().await.as_deref(), Some("x=1"));
}

#[tokio::test]
async fn test_connection_loss_drops_subscriptions() {
    let (session, mut server) = connected(ClientConfig::default()).await;
    let (_, listener) = recorder();

    let (id, _) = tokio::join!(session.subscribe("k", listener), async {
        let request = server.expect("ksub").await;
        server.reply_ok(&request, json!(null));
    });
    let id = id.unwrap();

    session.close().await;

    let err = session.unsubscribe("k", id).await.unwrap_err();
    assert!(matches!(err, KilovoltError::NotSubscribed(_)));
}

#[tokio::test]
async fn test_resubscribe_after_connection_lost_mid_subscribe() {
    let (session, mut servers) = mock_session(ClientConfig::default());
    let (result, mut server) = tokio::join!(session.connect(), async {
        let server = accept(&mut servers).await;
        server.hello();
        server
    });
    result.unwrap();

    // Server acknowledges the subscribe and hangs up straight away
    let (_, listener) = recorder();
    let (_, _) = tokio::join!(session.subscribe("k", listener), async move {
        let request = server.expect("ksub").await;
        server.reply_ok(&request, json!(null));
    });
    tokio::time::timeout(Duration::from_secs(5), session.closed())
        .await
        .expect("session should notice the hangup");
    assert!(!session.is_connected());

    let (result, mut server) = tokio::join!(session.connect(), async {
        let server = accept(&mut servers).await;
        server.hello();
        server
    });
    result.unwrap();

    // The new server has never heard of "k", so the subscribe must reach it
    let (seen, listener) = recorder();
    let (id, request) = tokio::join!(session.subscribe("k", listener), async {
        let request = server.expect("ksub").await;
        server.reply_ok(&request, json!(null));
        request
    });
    id.unwrap();
    assert_eq!(request["data"], json!({"key": "k"}));

    let (_, _) = tokio::join!(session.list(""), async {
        server.push("k", "v");
        let request = server.expect("klist").await;
        server.reply_ok(&request, json!([]));
    });
    assert_eq!(*seen.lock(), vec![("k".to_string(), "v".to_string())]);
}

#[tokio::test]
async fn test_panicking_listener_keeps_session_alive() {
    let (session, mut server) = connected(ClientConfig::default()).await;

    let (id, _) = tokio::join!(
        session.subscribe("k", |_, _| panic!("listener bug")),
        async {
            let request = server.expect("ksub").await;
            server.reply_ok(&request, json!(null));
        }
    );
    id.unwrap();

    let (response, _) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(5), session.list("")),
        async {
            let request = server.expect("klist").await;
            server.push("k", "boom");
            server.reply_ok(&request, json!(["k"]));
        }
    );
    let keys = response.expect("read loop stalled").unwrap();
    assert_eq!(keys, vec!["k"]);
    assert!(session.is_connected());

    let (response, _) = tokio::join!(session.get("k"), async {
        let request = server.expect("kget").await;
        server.reply_ok(&request, json!("still here"));
    });
    assert_eq!(response.unwrap(), "still here");
}
