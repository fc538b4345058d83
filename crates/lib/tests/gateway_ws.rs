//! Integration tests over a real WebSocket: auth failures, the connection limit, recoverable
//! message errors, and the first-message flow that opens a ticket.

mod common;

use futures_util::{SinkExt, StreamExt};
use helpdesk::config::Config;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(gw: &common::TestGateway) -> Ws {
    let (ws, _) = connect_async(gw.ws_url()).await.expect("ws connect");
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.expect("send frame");
}

/// Next JSON envelope, or the close code if the server closed the socket.
async fn next(ws: &mut Ws) -> Result<Value, Option<u16>> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within 5s");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return Ok(serde_json::from_str(&text).expect("envelope JSON"))
            }
            Some(Ok(Message::Close(frame))) => return Err(frame.map(|f| u16::from(f.code))),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Err(None),
        }
    }
}

#[tokio::test]
async fn unknown_session_gets_error_then_4001() {
    let gw = common::spawn_gateway(Config::default()).await;
    let mut ws = connect(&gw).await;
    send(&mut ws, json!({ "type": "init", "sessionId": "sess-missing" })).await;

    let err = next(&mut ws).await.expect("error envelope");
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "unauthenticated");
    assert_eq!(next(&mut ws).await, Err(Some(4001)));
}

#[tokio::test]
async fn message_before_init_is_refused_but_socket_stays_open() {
    let gw = common::spawn_gateway(Config::default()).await;
    let mut ws = connect(&gw).await;
    send(&mut ws, json!({ "type": "message", "message": "hi" })).await;

    let err = next(&mut ws).await.expect("error envelope");
    assert_eq!(err["code"], "unauthenticated");

    let sid = gw.login("10", "bob").await;
    send(&mut ws, json!({ "type": "init", "sessionId": sid })).await;
    let status = next(&mut ws).await.expect("status envelope");
    assert_eq!(status["type"], "status");
    assert_eq!(status["authenticated"], true);
}

#[tokio::test]
async fn connection_limit_closes_with_1013() {
    let mut config = Config::default();
    config.limits.max_connections = 1;
    let gw = common::spawn_gateway(config).await;

    let sid = gw.login("20", "carol").await;
    let mut first = connect(&gw).await;
    send(&mut first, json!({ "type": "init", "sessionId": sid })).await;
    next(&mut first).await.expect("first connection authenticated");

    let mut second = connect(&gw).await;
    let err = next(&mut second).await.expect("error envelope");
    assert_eq!(err["code"], "connection_limit_exceeded");
    assert_eq!(next(&mut second).await, Err(Some(1013)));
}

#[tokio::test]
async fn first_message_opens_ticket_and_acks_once() {
    let gw = common::spawn_gateway(Config::default()).await;
    let sid = gw.login("30", "Dana").await;
    let mut ws = connect(&gw).await;

    send(&mut ws, json!({ "type": "init", "sessionId": sid })).await;
    let status = next(&mut ws).await.expect("status envelope");
    assert_eq!(status["message"], "Waiting for your first message...");
    assert_eq!(status["user"]["id"], "30");

    send(&mut ws, json!({ "type": "message", "message": "Hello" })).await;
    let ack = next(&mut ws).await.expect("ack envelope");
    assert_eq!(ack["type"], "message");
    assert_eq!(ack["sender"], "bot");

    send(&mut ws, json!({ "type": "message", "message": "Still there?" })).await;
    send(&mut ws, json!({ "type": "heartbeat" })).await;
    // A follow-up produces no envelope; give the relay time to post it.
    let quiet = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(quiet.is_err(), "unexpected frame after follow-up: {:?}", quiet);

    assert_eq!(
        gw.platform.created.lock().unwrap().clone(),
        vec!["support-dana-30".to_string()]
    );
    let posted = gw.platform.posted.lock().unwrap().clone();
    assert_eq!(
        posted,
        vec![
            (5000, "Hello".to_string()),
            (5000, "Still there?".to_string())
        ]
    );
}

async fn posted_count(gw: &common::TestGateway, want: usize) -> usize {
    for _ in 0..100 {
        let n = gw.platform.posted.lock().unwrap().len();
        if n >= want {
            return n;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    gw.platform.posted.lock().unwrap().len()
}

#[tokio::test]
async fn oversized_message_is_refused_and_socket_stays_open() {
    let gw = common::spawn_gateway(Config::default()).await;
    let sid = gw.login("40", "erin").await;
    let mut ws = connect(&gw).await;
    send(&mut ws, json!({ "type": "init", "sessionId": sid })).await;
    next(&mut ws).await.expect("status envelope");

    send(&mut ws, json!({ "type": "message", "message": "x".repeat(10_000) })).await;
    let err = next(&mut ws).await.expect("error envelope");
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "message_too_large");

    send(&mut ws, json!({ "type": "message", "message": "Hello" })).await;
    let ack = next(&mut ws).await.expect("ack envelope");
    assert_eq!(ack["sender"], "bot");
    assert_eq!(gw.platform.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn rate_limited_message_is_refused_and_socket_stays_open() {
    let gw = common::spawn_gateway(Config::default()).await;
    let sid = gw.login("50", "frank").await;
    let mut ws = connect(&gw).await;
    send(&mut ws, json!({ "type": "init", "sessionId": sid })).await;
    next(&mut ws).await.expect("status envelope");

    for n in 0..6 {
        send(&mut ws, json!({ "type": "message", "message": format!("line {}", n) })).await;
    }
    let ack = next(&mut ws).await.expect("ack envelope");
    assert_eq!(ack["sender"], "bot");
    let err = next(&mut ws).await.expect("error envelope");
    assert_eq!(err["code"], "rate_limited");
    assert_eq!(posted_count(&gw, 5).await, 5);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    send(&mut ws, json!({ "type": "message", "message": "after the window" })).await;
    assert_eq!(posted_count(&gw, 6).await, 6);
    assert_eq!(
        gw.platform.posted.lock().unwrap()[5].1,
        "after the window".to_string()
    );
}
