//! Integration tests for the full relay: accept, build, control, shutdown.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatrelay::prelude::*;
use chatrelay_community::CommunityInfo;
use chatrelay_transport::{ConnectionId, TcpConnection};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const WAIT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

fn local_config() -> RelayConfig {
    RelayConfig::new("127.0.0.1", 0, 0).with_channel_capacity(16)
}

async fn start() -> Wrapper {
    Wrapper::bind(local_config()).await.expect("relay should bind")
}

async fn connect(relay: &Wrapper) -> TcpStream {
    TcpStream::connect(relay.local_addr()).await.unwrap()
}

/// Waits until `server`'s root community satisfies `f`.
async fn wait_root(
    relay: &Wrapper,
    server: &str,
    f: impl FnMut(&CommunityInfo) -> bool,
) -> CommunityInfo {
    tokio::time::timeout(WAIT, async {
        let server = relay
            .wait_for_server(&ServerId::from(server))
            .await
            .expect("relay stopped");
        let root = server
            .wait_for_community(&CommunityId::root())
            .await
            .expect("server stopped");
        root.wait_for(f).await.expect("community stopped")
    })
    .await
    .expect("root community never reached the expected state")
}

async fn read_message(client: &mut TcpStream) -> Message {
    tokio::time::timeout(WAIT, WireCodec::standard().read_frame(client))
        .await
        .expect("no frame arrived")
        .expect("frame should decode")
}

async fn assert_closed(client: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, client.read(&mut buf))
        .await
        .expect("connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

/// An active session built outside the relay, for driving the control
/// loop directly.
async fn standalone_session(id: u32) -> (Arc<ClientSession>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let conn = TcpConnection::from_stream(ConnectionId::new(1000), stream).unwrap();
    let session = PendingSession::new(conn, Arc::new(WireCodec::standard())).activate(Identity {
        id: SessionId(id),
        name: format!("Client_{id}"),
    });
    (session, client)
}

/// Asks the client for its name before admitting it.
struct AskName {
    allocator: IdentityAllocator,
}

impl Authenticator for AskName {
    async fn authenticate(
        &self,
        pending: &mut PendingSession,
    ) -> Result<Identity, SessionError> {
        pending.write_message(&Message::AuthRequest).await?;
        match pending.read_message().await? {
            Message::ClientNameResponse(name) => Ok(Identity {
                id: self.allocator.next(),
                name,
            }),
            other => Err(SessionError::AuthFailed(format!(
                "expected a name, got {}",
                other.message_type()
            ))),
        }
    }
}

// =========================================================================
// Placement
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_concurrent_connections_land_in_main_root() {
    let relay = start().await;

    let (a, b, c) = tokio::join!(connect(&relay), connect(&relay), connect(&relay));
    let info = wait_root(&relay, "main", |info| info.members.len() == 3).await;

    assert_eq!(relay.server_ids(), vec![ServerId::from("main")]);
    let server = relay.server(&ServerId::from("main")).unwrap();
    assert_eq!(server.community_ids(), vec![CommunityId::root()]);
    let distinct: HashSet<SessionId> = info.members.iter().copied().collect();
    assert_eq!(distinct.len(), 3);
    assert!(info.members.iter().all(|id| id.is_valid()));

    relay.shutdown().await.unwrap();
    drop((a, b, c));
}

#[tokio::test]
async fn test_resolver_picks_the_server() {
    let relay = Wrapper::builder(local_config())
        .resolver(StaticRegion::new("east"))
        .bind(PlaceholderAuthenticator::new(Arc::new(IdentityAllocator::new())))
        .await
        .unwrap();

    let _client = connect(&relay).await;
    wait_root(&relay, "east", |info| info.members.len() == 1).await;

    assert_eq!(relay.server_ids(), vec![ServerId::from("east")]);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handshake_authenticator_runs_over_the_wire() {
    let relay = Wrapper::builder(local_config())
        .bind(AskName {
            allocator: IdentityAllocator::starting_after(41),
        })
        .await
        .unwrap();
    let mut client = connect(&relay).await;

    assert_eq!(read_message(&mut client).await, Message::AuthRequest);
    let reply = WireCodec::standard()
        .encode(&Message::ClientNameResponse("alice".into()))
        .unwrap();
    client.write_all(&reply).await.unwrap();

    let info = wait_root(&relay, "main", |info| !info.members.is_empty()).await;
    assert_eq!(info.members, vec![SessionId(42)]);
    relay.shutdown().await.unwrap();
}

// =========================================================================
// Build failures
// =========================================================================

#[tokio::test]
async fn test_failed_handshake_drops_connection_without_placing_it() {
    let relay = Wrapper::builder(local_config())
        .bind(AskName {
            allocator: IdentityAllocator::new(),
        })
        .await
        .unwrap();
    let mut client = connect(&relay).await;

    assert_eq!(read_message(&mut client).await, Message::AuthRequest);
    // Wrong answer: text instead of a name.
    let wrong = WireCodec::standard()
        .encode(&Message::text(SessionId(1), "let me in"))
        .unwrap();
    client.write_all(&wrong).await.unwrap();

    assert_closed(&mut client).await;
    assert!(relay.server_ids().is_empty());
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_region_resolution_drops_connection() {
    let relay = Wrapper::builder(local_config())
        .resolver(|peer: SocketAddr| -> Result<ServerId, ResolveError> {
            Err(ResolveError::NoRegion(peer))
        })
        .bind(PlaceholderAuthenticator::new(Arc::new(IdentityAllocator::new())))
        .await
        .unwrap();
    let mut client = connect(&relay).await;

    assert_closed(&mut client).await;
    assert!(relay.server_ids().is_empty());
    relay.shutdown().await.unwrap();
}

// =========================================================================
// Text relay
// =========================================================================

#[tokio::test]
async fn test_text_from_one_client_reaches_the_other() {
    let relay = start().await;
    let mut alice = connect(&relay).await;
    wait_root(&relay, "main", |info| info.members.len() == 1).await;
    let mut bob = connect(&relay).await;
    let info = wait_root(&relay, "main", |info| info.members.len() == 2).await;
    // Placeholder ids are handed out in connection order.
    let (alice_id, _bob_id) = (info.members[0], info.members[1]);

    let frame = WireCodec::standard()
        .encode(&Message::text(SessionId(7), "hi"))
        .unwrap();
    alice.write_all(&frame).await.unwrap();

    assert_eq!(read_message(&mut bob).await, Message::text(alice_id, "hi"));
    relay.shutdown().await.unwrap();
}

// =========================================================================
// Moving between servers
// =========================================================================

#[tokio::test]
async fn test_join_server_moves_session_out_of_previous_server() {
    let relay = start().await;
    let (session, _client) = standalone_session(500).await;

    relay
        .join_server(ServerId::from("west"), Arc::clone(&session))
        .await
        .unwrap();
    relay
        .join_server(ServerId::from("east"), Arc::clone(&session))
        .await
        .unwrap();

    let west = relay.server(&ServerId::from("west")).unwrap();
    let east = relay.server(&ServerId::from("east")).unwrap();
    assert!(west.root().unwrap().members().is_empty());
    assert_eq!(east.root().unwrap().members(), vec![SessionId(500)]);
    assert_eq!(session.server_id(), Some(ServerId::from("east")));
    assert_eq!(session.community_id(), Some(CommunityId::root()));
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_join_same_server_again_keeps_single_membership() {
    let relay = start().await;
    let (session, _client) = standalone_session(501).await;
    let main = ServerId::from("main");

    relay.join_server(main.clone(), Arc::clone(&session)).await.unwrap();
    let server = relay.server(&main).unwrap();
    server
        .join_community(CommunityId::from("lobby"), Arc::clone(&session))
        .await
        .unwrap();

    relay.join_server(main.clone(), Arc::clone(&session)).await.unwrap();

    assert_eq!(server.root().unwrap().members(), vec![SessionId(501)]);
    assert!(server
        .community(&CommunityId::from("lobby"))
        .unwrap()
        .members()
        .is_empty());
    relay.shutdown().await.unwrap();
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_closes_clients_and_listener() {
    let relay = start().await;
    let addr = relay.local_addr();
    let mut a = connect(&relay).await;
    let mut b = connect(&relay).await;
    wait_root(&relay, "main", |info| info.members.len() == 2).await;

    relay.shutdown().await.unwrap();

    assert_closed(&mut a).await;
    assert_closed(&mut b).await;
    assert!(TcpStream::connect(addr).await.is_err(), "listener should be closed");
}

#[tokio::test]
async fn test_shutdown_completes_while_a_client_stops_reading() {
    let relay = start().await;
    let alice = connect(&relay).await;
    wait_root(&relay, "main", |info| info.members.len() == 1).await;
    let mut bob = connect(&relay).await;
    wait_root(&relay, "main", |info| info.members.len() == 2).await;

    // Bob never reads, so relaying this to him stalls.
    let frame = WireCodec::standard()
        .encode(&Message::text(SessionId(0), vec![b'x'; 32 << 20]))
        .unwrap();
    let sender = tokio::spawn(async move {
        let mut alice = alice;
        let _ = alice.write_all(&frame).await;
        alice
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(WAIT, relay.shutdown())
        .await
        .expect("relay shutdown waited behind a stalled client")
        .unwrap();

    let mut alice = sender.await.unwrap();
    assert_closed(&mut alice).await;
    let mut sink = Vec::new();
    tokio::time::timeout(WAIT, bob.read_to_end(&mut sink))
        .await
        .expect("stalled client was not closed")
        .ok();
}

#[tokio::test]
async fn test_shutdown_twice_returns_already_stopped() {
    let relay = start().await;

    relay.shutdown().await.unwrap();
    let second = relay.shutdown().await;

    assert!(matches!(second, Err(RelayError::AlreadyStopped)));
}

#[tokio::test]
async fn test_join_after_shutdown_is_unavailable() {
    let relay = start().await;
    let (session, _client) = standalone_session(502).await;
    relay.shutdown().await.unwrap();

    let result = relay.join_server(ServerId::from("main"), session).await;

    assert!(matches!(result, Err(MembershipError::Unavailable(_))));
}
