//! Integration tests for the TCP transport.
//!
//! These spin up a real listener on a loopback port and connect real
//! clients to it, so data actually crosses a socket.

use std::time::Duration;

use chatrelay_transport::{ConnectionId, TcpConnection, TcpTransport, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_tcp_accept_and_exchange_bytes() {
    let mut transport = TcpTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().expect("should have local addr");

    let server_handle = tokio::spawn(async move {
        let conn = transport.accept().await.expect("should accept");
        (transport, conn)
    });

    let mut client = TcpStream::connect(addr).await.expect("client should connect");
    let (_transport, conn) = tokio::time::timeout(WAIT, server_handle)
        .await
        .expect("accept timed out")
        .expect("task should complete");

    assert!(conn.id().into_inner() > 0);
    assert_eq!(conn.peer_addr(), client.local_addr().unwrap());

    let (mut read_half, mut write_half) = conn.into_split();

    // --- Server writes, client reads ---
    write_half.write_all(b"hello from server").await.unwrap();
    let mut buf = [0u8; 17];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello from server");

    // --- Client writes, server reads ---
    client.write_all(b"hello from client").await.unwrap();
    let mut buf = [0u8; 17];
    read_half.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello from client");
}

#[tokio::test]
async fn test_tcp_accept_assigns_distinct_ids() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();

    let _c1 = TcpStream::connect(addr).await.unwrap();
    let _c2 = TcpStream::connect(addr).await.unwrap();

    let a = transport.accept().await.unwrap();
    let b = transport.accept().await.unwrap();

    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn test_tcp_shutdown_refuses_new_connections() {
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();

    transport.shutdown();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_tcp_dropping_both_halves_closes_socket() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();

    let conn = TcpConnection::from_stream(ConnectionId::new(1), stream).unwrap();
    drop(conn.into_split());

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(WAIT, client.read(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    assert_eq!(n, 0, "peer should observe EOF");
}

#[test]
fn test_bind_error_names_address() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let err = rt
        .block_on(TcpTransport::bind("not-an-address"))
        .err()
        .expect("bind should fail");
    assert!(err.to_string().contains("not-an-address"));
}
