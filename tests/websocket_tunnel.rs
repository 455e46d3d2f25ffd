// End-to-end checks for upgrade requests tunnelled through the edge server
use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use portico::{
    EdgeServer, HttpClientAdapter, HttpServer, ProxyHandler, Resolver,
    adapters::{TunnelPolicy, WebSocketTunnel},
    core::{Binding, Node, Service, ServiceEntry},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

async fn start_edge(backend: SocketAddr) -> EdgeServer {
    let service = Service::new(
        "chat",
        vec![ServiceEntry::new(
            "chat",
            vec![Node::new("chat-1", backend.to_string())],
        )],
    );
    let resolver = Arc::new(Resolver::new(Binding::Static(service)));
    let proxy = ProxyHandler::new(resolver, Arc::new(HttpClientAdapter::new().unwrap()))
        .with_tunnel(WebSocketTunnel::new(TunnelPolicy {
            dial_timeout: Some(Duration::from_secs(2)),
            drain_grace: Duration::from_millis(200),
        }));

    let server = EdgeServer::new("127.0.0.1:0", []);
    server.handle("/", proxy.into_route());
    server.start().await.unwrap();
    server
}

/// A WebSocket server that echoes text and binary frames.
async fn spawn_ws_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    } else if msg.is_close() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// A backend that answers the upgrade with a bare 101 and then echoes raw
/// bytes. The request head it saw is sent back over `seen`.
async fn spawn_raw_echo(seen: oneshot::Sender<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = read_head(&mut stream).await;
        let _ = seen.send(head);
        stream
            .write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
            )
            .await
            .unwrap();
        let (mut reader, mut writer) = stream.split();
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    });
    addr
}

/// A backend that refuses every upgrade.
async fn spawn_refusing_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_head(&mut stream).await;
        stream
            .write_all(
                b"HTTP/1.1 403 Forbidden\r\nContent-Length: 7\r\nConnection: close\r\n\r\ndenied!",
            )
            .await
            .unwrap();
    });
    addr
}

/// A backend that accepts the connection and hangs up without answering.
async fn spawn_hangup_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            read_head(&mut stream).await;
            drop(stream);
        }
    });
    addr
}

const UPGRADE_REQUEST: &str = "GET /chat?room=1 HTTP/1.1\r\n\
    Host: edge.test\r\n\
    Connection: Upgrade\r\n\
    Upgrade: websocket\r\n\
    X-Forwarded-For: 198.51.100.7\r\n\
    \r\n";

#[tokio::test(flavor = "multi_thread")]
async fn test_websocket_echo_through_edge() {
    let backend = spawn_ws_echo().await;
    let server = start_edge(backend).await;

    let (mut ws, response) = connect_async(format!("ws://{}/chat", server.address()))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::text("hello")).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "hello");

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply.into_data().as_ref(), &[1u8, 2, 3]);

    ws.close(None).await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_raw_bytes_are_tunnelled_after_101() {
    let (seen_tx, seen_rx) = oneshot::channel();
    let backend = spawn_raw_echo(seen_tx).await;
    let server = start_edge(backend).await;

    let mut client = TcpStream::connect(server.address()).await.unwrap();
    client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {head}");

    let forwarded = seen_rx.await.unwrap().to_ascii_lowercase();
    assert!(forwarded.starts_with("get /chat?room=1 http/1.1\r\n"));
    assert!(forwarded.contains("host: edge.test\r\n"));
    assert!(forwarded.contains("x-forwarded-for: 198.51.100.7, 127.0.0.1\r\n"));

    client.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"ping");

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_refused_upgrade_is_relayed() {
    let backend = spawn_refusing_backend().await;
    let server = start_edge(backend).await;

    let mut client = TcpStream::connect(server.address()).await.unwrap();
    client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 403"), "unexpected head: {head}");

    let mut body = [0u8; 7];
    client.read_exact(&mut body).await.unwrap();
    assert_eq!(&body, b"denied!");

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_backend_reports_dial_error() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let server = start_edge(closed).await;

    let mut client = TcpStream::connect(server.address()).await.unwrap();
    client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 500"), "unexpected head: {head}");

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_hangup_during_handshake_is_bad_gateway() {
    let backend = spawn_hangup_backend().await;
    let server = start_edge(backend).await;

    let mut client = TcpStream::connect(server.address()).await.unwrap();
    client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();

    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 502"), "unexpected head: {head}");

    server.stop().await.unwrap();
}
