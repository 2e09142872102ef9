//! Event feed integration tests

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agentlab::AppState;
use common::{add_member, agent_with_token, propose, setup_lab, setup_state, test_config};
use futures::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

async fn setup_server() -> (SocketAddr, Arc<AppState>) {
    let state = setup_state(test_config()).await;
    let app = agentlab::api::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

fn events_request(
    addr: SocketAddr,
    lab_id: Uuid,
    token: Option<&str>,
) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let mut request = format!("ws://{}/labs/{}/events", addr, lab_id)
        .into_client_request()
        .unwrap();
    if let Some(token) = token {
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
    }
    request
}

#[tokio::test]
async fn test_feed_streams_events_for_its_lab_only() {
    let (addr, state) = setup_server().await;
    let lc = &state.lifecycle;
    let agent = agent_with_token(&state, "member-token").await;

    let (lab, pi) = setup_lab(lc, "watched").await;
    lc.join_lab(lab.id, agent, "scout").await.unwrap();
    let (other_lab, other_pi) = setup_lab(lc, "unwatched").await;

    let (mut ws_stream, _) = tokio_tungstenite::connect_async(events_request(addr, lab.id, Some("member-token")))
        .await
        .unwrap();

    propose(lc, other_lab.id, other_pi, "analysis").await;
    let task = propose(lc, lab.id, pi, "literature_review").await;

    let frame = tokio::time::timeout(Duration::from_secs(2), ws_stream.next())
        .await
        .expect("timed out waiting for event");
    if let Some(Ok(Message::Text(text))) = frame {
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "task_proposed");
        assert_eq!(json["task_id"], task.id.to_string());
        assert_eq!(json["lab_id"], lab.id.to_string());
    } else {
        panic!("Expected text message");
    }

    lc.pick_up(task.id, agent).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(2), ws_stream.next())
        .await
        .expect("timed out waiting for event");
    if let Some(Ok(Message::Text(text))) = frame {
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "task_picked_up");
        assert_eq!(json["agent_id"], agent.to_string());
    } else {
        panic!("Expected text message");
    }
}

#[tokio::test]
async fn test_feed_requires_token() {
    let (addr, state) = setup_server().await;
    let (lab, _pi) = setup_lab(&state.lifecycle, "private").await;

    let result = tokio_tungstenite::connect_async(events_request(addr, lab.id, None)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_feed_requires_membership() {
    let (addr, state) = setup_server().await;
    let (lab, _pi) = setup_lab(&state.lifecycle, "closed").await;
    agent_with_token(&state, "outsider").await;

    let result =
        tokio_tungstenite::connect_async(events_request(addr, lab.id, Some("outsider"))).await;
    assert!(result.is_err());

    let member = add_member(&state.lifecycle, lab.id, "critic").await;
    state.store().insert_agent_token("critic-token", member).await.unwrap();
    let result =
        tokio_tungstenite::connect_async(events_request(addr, lab.id, Some("critic-token"))).await;
    assert!(result.is_ok());
}
