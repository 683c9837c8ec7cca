//! Runs `ChatSession` against a real tokio-tungstenite server on localhost.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use room_sync::{
    ChatError, ChatSession, ConnectionState, Identity, ReconnectPolicy, SessionConfig,
    WebSocketConnector,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

struct ServerConn {
    uri: String,
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    async fn push(&mut self, value: Value) {
        self.ws.send(WsMessage::text(value.to_string())).await.unwrap();
    }

    async fn next_json(&mut self) -> Value {
        loop {
            let frame = timeout(WAIT, self.ws.next())
                .await
                .expect("frame within timeout")
                .expect("stream open")
                .expect("valid frame");
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn close_code(&mut self) -> Option<CloseCode> {
        loop {
            match timeout(WAIT, self.ws.next()).await.expect("close within timeout") {
                Some(Ok(WsMessage::Close(frame))) => return frame.map(|f| f.code),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    }
}

struct TestServer {
    url: String,
    connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let uri = Arc::new(Mutex::new(String::new()));
                    let captured = Arc::clone(&uri);
                    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        *captured.lock().unwrap() = req.uri().to_string();
                        Ok(resp)
                    };
                    if let Ok(ws) = accept_hdr_async(stream, callback).await {
                        let uri = uri.lock().unwrap().clone();
                        let _ = tx.send(ServerConn { uri, ws });
                    }
                });
            }
        });

        TestServer {
            url: format!("ws://{addr}/ws"),
            connections,
        }
    }

    async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("client connected within timeout")
            .expect("server running")
    }
}

fn config(url: &str, base_ms: u64) -> SessionConfig {
    SessionConfig {
        connect_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(base_ms * 4),
            max_attempts: 5,
        },
        ..SessionConfig::new(url)
    }
}

fn session(url: &str, base_ms: u64) -> ChatSession {
    ChatSession::new(
        config(url, base_ms),
        Some(Identity::new("secret", "me")),
        WebSocketConnector::new(),
    )
}

async fn wait_for_state(session: &ChatSession, state: ConnectionState) {
    let mut rx = session.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state:?}"))
        .unwrap();
}

fn message(id: &str, at: &str) -> Value {
    json!({"id": id, "content": id, "senderId": "u2", "roomId": "r1", "createdAt": at})
}

#[tokio::test]
async fn full_flow_over_websocket() {
    let mut server = TestServer::start().await;
    let session = session(&server.url, 100);

    session.connect().unwrap();
    let mut conn = server.accept().await;
    assert!(conn.uri.contains("token=secret"), "uri was {}", conn.uri);
    assert!(conn.uri.contains("userId=me"));
    wait_for_state(&session, ConnectionState::Connected).await;

    conn.push(json!({
        "type": "conversation-list",
        "conversations": [{"id": "r1", "name": "General", "unreadCount": 2, "createdAt": "2024-01-01T00:00:00Z"}]
    }))
    .await;
    let mut conversations = session.watch_conversations();
    timeout(WAIT, conversations.wait_for(|c| c.len() == 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.conversations()[0].unread_count, 2);

    session.select_room("r1");
    assert!(session.messages().is_empty());
    assert_eq!(conn.next_json().await, json!({"type": "subscribe", "roomId": "r1"}));

    conn.push(json!({
        "type": "past-messages",
        "roomId": "r1",
        "messages": [message("new", "2024-01-01T00:00:02Z"), message("old", "2024-01-01T00:00:01Z")]
    }))
    .await;
    let mut messages = session.watch_messages();
    timeout(WAIT, messages.wait_for(|m| m.len() == 2))
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<String> = session.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["old", "new"]);

    session
        .send_message(Some("hi".to_string()), vec!["https://cdn.test/a.png".to_string()])
        .unwrap();
    assert_eq!(
        conn.next_json().await,
        json!({"type": "send-message", "content": "hi", "fileUrl": ["https://cdn.test/a.png"], "roomId": "r1"})
    );

    session.mark_read().unwrap();
    assert_eq!(conn.next_json().await, json!({"type": "read-message"}));

    session.shutdown().await;
    assert_eq!(conn.close_code().await, Some(CloseCode::Away));
}

#[tokio::test]
async fn server_error_is_surfaced_without_closing() {
    let mut server = TestServer::start().await;
    let session = session(&server.url, 100);
    session.connect().unwrap();
    let mut conn = server.accept().await;
    wait_for_state(&session, ConnectionState::Connected).await;

    // frames are applied in order, so seeing the error means the two
    // frames before it were handled too
    conn.push(json!({"type": "typing", "userId": "u2"})).await;
    conn.push(json!({"type": "new-message"})).await;
    conn.push(json!({"type": "error", "message": "Unauthorized room"})).await;

    let mut errors = session.watch_errors();
    timeout(WAIT, errors.wait_for(Option::is_some))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        session.last_error(),
        Some(ChatError::ServerReported("Unauthorized room".to_string()))
    );

    // the connection is still usable afterwards
    session.select_room("r7");
    assert_eq!(conn.next_json().await, json!({"type": "subscribe", "roomId": "r7"}));
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(session.stats().unknown_frames, 1);
    assert_eq!(session.stats().malformed_frames, 1);
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resubscribes() {
    let mut server = TestServer::start().await;
    let session = session(&server.url, 50);
    session.connect().unwrap();

    let mut first = server.accept().await;
    wait_for_state(&session, ConnectionState::Connected).await;
    session.select_room("r1");
    assert_eq!(first.next_json().await, json!({"type": "subscribe", "roomId": "r1"}));

    drop(first);

    let mut second = server.accept().await;
    assert_eq!(second.next_json().await, json!({"type": "subscribe", "roomId": "r1"}));
    wait_for_state(&session, ConnectionState::Connected).await;

    session.shutdown().await;
}

#[tokio::test]
async fn room_selected_while_reconnecting_is_subscribed_on_reconnect() {
    let mut server = TestServer::start().await;
    let session = session(&server.url, 400);
    session.connect().unwrap();

    let first = server.accept().await;
    wait_for_state(&session, ConnectionState::Connected).await;
    drop(first);

    wait_for_state(&session, ConnectionState::Reconnecting).await;
    session.select_room("r2");
    assert!(session.messages().is_empty());
    assert_eq!(
        session.send_message(Some("too early".to_string()), vec![]),
        Err(ChatError::NotConnected)
    );

    let mut second = server.accept().await;
    assert_eq!(second.next_json().await, json!({"type": "subscribe", "roomId": "r2"}));

    session.shutdown().await;
}

#[tokio::test]
async fn server_going_away_is_final() {
    let mut server = TestServer::start().await;
    let session = session(&server.url, 50);
    session.connect().unwrap();

    let mut conn = server.accept().await;
    wait_for_state(&session, ConnectionState::Connected).await;
    conn.ws
        .close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        }))
        .await
        .unwrap();

    wait_for_state(&session, ConnectionState::Disconnected).await;
    let reconnect = timeout(Duration::from_millis(500), server.connections.recv()).await;
    assert!(reconnect.is_err(), "client must not reconnect after going away");
}
