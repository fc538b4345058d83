//! Integration test: serve the gateway on a free port, GET /, assert health JSON.
//! Uses an in-process support platform; no Discord connection is made.

mod common;

use helpdesk::config::Config;
use std::time::Duration;

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let gw = common::spawn_gateway(Config::default()).await;

    let url = gw.http_url("/");
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("protocol").and_then(|v| v.as_u64()), Some(1));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(gw.addr.port() as u64));
                assert_eq!(json.get("connections").and_then(|v| v.as_u64()), Some(0));
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn session_and_board_routes_answer_without_login() {
    let gw = common::spawn_gateway(Config::default()).await;
    let client = reqwest::Client::new();

    let session: serde_json::Value = client
        .get(gw.http_url("/auth/session"))
        .send()
        .await
        .expect("GET /auth/session")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(session, serde_json::json!({ "authenticated": false }));

    let board: serde_json::Value = client
        .get(gw.http_url("/api/announcements"))
        .send()
        .await
        .expect("GET /api/announcements")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(board, serde_json::json!([]));

    let blocked: serde_json::Value = client
        .get(gw.http_url("/auth/check-block/42"))
        .send()
        .await
        .expect("GET /auth/check-block")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(blocked, serde_json::json!({ "blocked": false }));
}

#[tokio::test]
async fn session_route_reads_cookie() {
    let gw = common::spawn_gateway(Config::default()).await;
    let sid = gw.login("77", "alice").await;

    let session: serde_json::Value = reqwest::Client::new()
        .get(gw.http_url("/auth/session"))
        .header("Cookie", format!("sessionId={}", sid))
        .send()
        .await
        .expect("GET /auth/session")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(session["authenticated"], true);
    assert_eq!(session["user"]["id"], "77");
    assert_eq!(session["user"]["username"], "alice");
}
