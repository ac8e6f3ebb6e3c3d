//! WebSocket connection handler
//!
//! Handles individual connections: WebSocket handshake, routing to a room,
//! and driving the host or member session until the connection ends.
//!
//! Routes (on the handshake request):
//! - `/ws/new?name=<name>`: create a room and become its host; the room id
//!   is returned in the `X-Room-Id` response header
//! - `/ws/<ROOM>?name=<name>`: attach to an existing room, as its host if
//!   the room has none yet

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, Uri};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::client::Client;
use crate::error::{AppError, RoomError, Violation};
use crate::message::Message;
use crate::registry::Registry;
use crate::room::Room;
use crate::types::RoomId;

/// Response header carrying the id of a newly created room
pub const ROOM_ID_HEADER: &str = "x-room-id";

/// Where a handshake request wants to go
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    Create,
    Attach(RoomId),
}

/// Resolved target of an accepted handshake
struct Target {
    room: Arc<Room>,
    name: String,
    created: bool,
}

/// Accept connections forever
pub async fn serve(listener: TcpListener, registry: Arc<Registry>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let registry = Arc::clone(&registry);

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, registry).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, attaches the client to its room and
/// runs the matching session.
pub async fn handle_connection(stream: TcpStream, registry: Arc<Registry>) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let mut target = None;
    let handshake = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        resolve(&registry, req, resp, &mut target)
    })
    .await;

    let ws_stream = match handshake {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            // Don't leave a hostless room behind
            if let Some(Target {
                room,
                created: true,
                ..
            }) = &target
            {
                registry.remove(room.id());
            }
            return Err(e.into());
        }
    };
    let Some(Target { room, name, .. }) = target else {
        // The callback always resolves a target before accepting
        return Ok(());
    };

    let client = Arc::new(Client::new(ws_stream, name));
    client.start()?;
    info!(
        "Client {} ({}) connected from {} to room {}",
        client.id(),
        client.name(),
        peer_addr,
        room.id()
    );

    attach(&registry, room, client).await
}

/// Run a started client's session in its room
///
/// The first client to claim the host slot hosts the room; everyone after
/// it is a member.
pub(crate) async fn attach(
    registry: &Registry,
    room: Arc<Room>,
    client: Arc<Client>,
) -> Result<(), AppError> {
    match room.set_host(Arc::clone(&client)).await {
        Ok(()) => {
            host_session(registry, room, client).await;
            Ok(())
        }
        Err(RoomError::InvariantViolation {
            violation: Violation::HostAlreadySet,
            ..
        }) => member_session(room, client).await,
        Err(e) => {
            refuse(&client, &e).await;
            Err(e.into())
        }
    }
}

/// Handshake callback: route the request and resolve its room
fn resolve(
    registry: &Registry,
    req: &Request,
    mut resp: Response,
    target: &mut Option<Target>,
) -> Result<Response, ErrorResponse> {
    let (route, name) = parse_request(req.uri()).map_err(|status| {
        debug!("Rejecting handshake for {}: {}", req.uri(), status);
        reject(status, status.canonical_reason().unwrap_or("bad request"))
    })?;

    let (room, created) = match route {
        Route::Create => match registry.create() {
            Ok(room) => (room, true),
            Err(e) => {
                warn!("Cannot create room: {}", e);
                return Err(reject(StatusCode::SERVICE_UNAVAILABLE, "no free room id"));
            }
        },
        Route::Attach(id) => match registry.lookup(&id) {
            Some(room) => (room, false),
            None => {
                debug!("Handshake for unknown room {}", id);
                return Err(reject(StatusCode::NOT_FOUND, "room not found"));
            }
        },
    };

    if created {
        match HeaderValue::from_str(room.id().as_str()) {
            Ok(value) => {
                resp.headers_mut().insert(ROOM_ID_HEADER, value);
            }
            Err(_) => {
                registry.remove(room.id());
                return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "bad room id"));
            }
        }
    }

    *target = Some(Target {
        room,
        name,
        created,
    });
    Ok(resp)
}

/// Split a handshake URI into its route and the participant name
pub(crate) fn parse_request(uri: &Uri) -> Result<(Route, String), StatusCode> {
    let rest = uri
        .path()
        .strip_prefix("/ws/")
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .ok_or(StatusCode::NOT_FOUND)?;

    let name = uri
        .query()
        .and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "name")
                .map(|(_, value)| value.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let route = if rest == "new" {
        Route::Create
    } else {
        Route::Attach(RoomId::from_string(rest))
    };
    Ok((route, name))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = status;
    resp
}

/// Drive the host: wait for start, then hold the room open until the host leaves
async fn host_session(registry: &Registry, room: Arc<Room>, host: Arc<Client>) {
    let id = room.id().clone();
    room.set_on_close({
        let id = id.clone();
        move || info!("Room {} closed", id)
    });

    match room.run().await {
        Ok(()) => {
            while let Some(msg) = host.recv().await {
                debug!("Room {} ignoring {} from host", id, msg.kind().as_str());
            }
        }
        Err(e) => info!("Room {} did not start: {}", id, e),
    }

    info!("Host of room {} disconnected", id);
    match registry.teardown(&id).await {
        Some(Ok(())) => {}
        Some(Err(e)) => warn!("{}", e),
        None => debug!("Room {} was already removed", id),
    }
}

/// Drive a member: join, then wait for the connection to end
async fn member_session(room: Arc<Room>, member: Arc<Client>) -> Result<(), AppError> {
    if let Err(e) = room.join(Arc::clone(&member)).await {
        refuse(&member, &e).await;
        return Err(e.into());
    }

    while let Some(msg) = member.recv().await {
        debug!(
            "Room {} ignoring {} from member {}",
            room.id(),
            msg.kind().as_str(),
            member.id()
        );
    }

    // No-op when the room was torn down
    room.leave(member.id()).await;
    Ok(())
}

/// Report a room error to the client, then close it
async fn refuse(client: &Client, err: &RoomError) {
    if let Err(e) = client.send(Message::error(err)).await {
        debug!("Could not report error to client {}: {}", client.id(), e);
    }
    client.close();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::{self, MemoryPeer};
    use crate::room::RoomPhase;

    const WAIT: Duration = Duration::from_secs(2);

    fn started(name: &str) -> (Arc<Client>, MemoryPeer) {
        let (conn, peer) = memory::pair();
        let client = Arc::new(Client::new(conn, name));
        client.start().unwrap();
        (client, peer)
    }

    async fn eventually<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(WAIT, async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_first_attach_to_hostless_room_becomes_host() {
        let registry = Arc::new(Registry::new(None));
        let room = registry.create().unwrap();

        let (alice, mut alice_peer) = started("Alice");
        let alice_session = tokio::spawn({
            let registry = Arc::clone(&registry);
            let room = Arc::clone(&room);
            async move { attach(&registry, room, alice).await }
        });
        eventually(|| room.has_host()).await;

        let (bob, mut bob_peer) = started("Bob");
        let bob_session = tokio::spawn({
            let registry = Arc::clone(&registry);
            let room = Arc::clone(&room);
            async move { attach(&registry, room, bob).await }
        });

        let announced = tokio::time::timeout(WAIT, alice_peer.next_message()).await.unwrap();
        assert_eq!(announced, Some(Message::join("Bob")));
        assert_eq!(room.member_count().await, 1);

        alice_peer.send_message(&Message::Start);
        eventually(|| room.is_running()).await;

        // The host leaving tears the room down for Bob
        alice_peer.abort();
        let notice = tokio::time::timeout(WAIT, bob_peer.next_message()).await.unwrap();
        assert_eq!(notice, Some(Message::error("host disconnected")));

        alice_session.await.unwrap().unwrap();
        bob_session.await.unwrap().unwrap();
        assert_eq!(room.phase().await, RoomPhase::Closed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_attach_to_closed_room_is_refused() {
        let registry = Registry::new(None);
        let room = registry.create().unwrap();
        room.close().await.unwrap();

        let (carol, mut carol_peer) = started("Carol");
        let err = attach(&registry, room, carol).await.unwrap_err();

        assert!(matches!(err, AppError::Room(RoomError::Closed(_))));
        let refusal = tokio::time::timeout(WAIT, carol_peer.next_message()).await.unwrap();
        assert!(matches!(refusal, Some(Message::Error { .. })));
    }

    #[test]
    fn test_create_route() {
        let (route, name) = parse_request(&uri("/ws/new?name=alice")).unwrap();
        assert_eq!(route, Route::Create);
        assert_eq!(name, "alice");
    }

    #[test]
    fn test_attach_route_uppercases_id() {
        let (route, name) = parse_request(&uri("/ws/abcd?name=Bob%20Smith")).unwrap();
        assert_eq!(route, Route::Attach(RoomId::from_string("ABCD")));
        assert_eq!(name, "Bob Smith");
    }

    #[test]
    fn test_missing_name() {
        assert_eq!(
            parse_request(&uri("/ws/ABCD")).unwrap_err(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            parse_request(&uri("/ws/ABCD?name=%20")).unwrap_err(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            parse_request(&uri("/ws/ABCD?other=x")).unwrap_err(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_unknown_paths() {
        for path in ["/", "/ws/", "/ws", "/rooms/ABCD?name=x", "/ws/AB/CD?name=x"] {
            assert_eq!(
                parse_request(&uri(path)).unwrap_err(),
                StatusCode::NOT_FOUND,
                "{path}"
            );
        }
    }
}
