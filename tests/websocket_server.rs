//! End-to-end tests over real WebSocket connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use roomcast::handler::ROOM_ID_HEADER;
use roomcast::{serve, Message, Registry, RoomId};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> (SocketAddr, Arc<Registry>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(Registry::new(Some(Duration::from_secs(1))));
    tokio::spawn(serve(listener, Arc::clone(&registry)));
    (addr, registry)
}

async fn connect(addr: SocketAddr, path: &str) -> Result<(Ws, Option<String>), tungstenite::Error> {
    let (ws, resp) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}")).await?;
    let room_id = resp
        .headers()
        .get(ROOM_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok((ws, room_id))
}

/// Next room message, skipping control frames; `None` on close
async fn next_message(ws: &mut Ws) -> Option<Message> {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")?;
        match frame {
            Ok(WsMessage::Text(text)) => {
                return Some(Message::decode(text.as_bytes()).expect("server sent a valid message"))
            }
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn send(ws: &mut Ws, msg: &Message) {
    ws.send(WsMessage::Text(msg.encode().unwrap().into()))
        .await
        .unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn create_join_start_and_host_leave() {
    let (addr, registry) = start_server().await;

    let (mut host, room_id) = connect(addr, "/ws/new?name=host").await.unwrap();
    let room_id = room_id.expect("room id header");
    assert_eq!(room_id.len(), 4);
    let room = registry.lookup(&RoomId::from_string(&room_id)).unwrap();
    assert_eq!(registry.len(), 1);
    tokio::time::timeout(WAIT, async {
        while !room.has_host().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("host never attached");

    let (mut alice, header) = connect(addr, &format!("/ws/{room_id}?name=alice"))
        .await
        .unwrap();
    assert!(header.is_none());
    assert_eq!(next_message(&mut host).await, Some(Message::join("alice")));

    let (mut bob, _) = connect(addr, &format!("/ws/{}?name=bob", room_id.to_lowercase()))
        .await
        .unwrap();
    assert_eq!(next_message(&mut host).await, Some(Message::join("bob")));
    assert_eq!(next_message(&mut alice).await, Some(Message::join("bob")));

    send(&mut host, &Message::Start).await;
    tokio::time::timeout(WAIT, async {
        while !room.is_running().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room never started");

    host.close(None).await.unwrap();

    for member in [&mut alice, &mut bob] {
        assert_eq!(
            next_message(member).await,
            Some(Message::error("host disconnected"))
        );
        assert_eq!(next_message(member).await, None);
    }
    wait_until(|| registry.is_empty()).await;
}

#[tokio::test]
async fn handshake_rejections() {
    let (addr, registry) = start_server().await;

    let status = |err: tungstenite::Error| match err {
        tungstenite::Error::Http(resp) => resp.status().as_u16(),
        other => panic!("expected an HTTP rejection, got {other:?}"),
    };

    let err = connect(addr, "/ws/new").await.unwrap_err();
    assert_eq!(status(err), 400);

    let err = connect(addr, "/ws/ZZZZ?name=alice").await.unwrap_err();
    assert_eq!(status(err), 404);

    let err = connect(addr, "/elsewhere?name=alice").await.unwrap_err();
    assert_eq!(status(err), 404);

    assert!(registry.is_empty());
}

#[tokio::test]
async fn unknown_messages_do_not_break_the_connection() {
    let (addr, registry) = start_server().await;

    let (mut host, room_id) = connect(addr, "/ws/new?name=host").await.unwrap();
    let room_id = room_id.unwrap();
    let room = registry.lookup(&RoomId::from_string(&room_id)).unwrap();

    host.send(WsMessage::Text(r#"{"type":"ping-pong"}"#.to_string().into()))
        .await
        .unwrap();
    host.send(WsMessage::Text("garbage".to_string().into()))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, async {
        while !room.has_host().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("host never attached");

    let (_alice, _) = connect(addr, &format!("/ws/{room_id}?name=alice"))
        .await
        .unwrap();
    assert_eq!(next_message(&mut host).await, Some(Message::join("alice")));
}
