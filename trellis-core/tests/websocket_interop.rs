use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use trellis_core::prelude::*;

async fn hello(Path(name): Path<String>) -> String {
    format!("hello, {name}")
}

fn echo() -> Arc<dyn Handler> {
    from_fn(|ctx| {
        Box::pin(async move {
            let ws = match WebSocket::upgrade(ctx).await {
                Ok(ws) => ws,
                Err(err) => return err.into_response(ctx),
            };
            tokio::spawn(async move {
                while let Ok(msg) = ws.message().await {
                    if ws.send_message(&msg).await.is_err() {
                        break;
                    }
                }
            });
        })
    })
}

async fn spawn_server() -> SocketAddr {
    let router = Router::new()
        .layer(Recovery::new())
        .get("/hello/:name", handler(hello))
        .get("/ws", echo());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(router.serve(listener));
    addr
}

async fn raw(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_tungstenite_client_echo() {
    let addr = spawn_server().await;
    let (mut client, response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(response.status(), 101);

    client.send(WsMessage::Text("hello".into())).await.unwrap();
    assert_eq!(
        client.next().await.unwrap().unwrap(),
        WsMessage::Text("hello".into())
    );

    let big = vec![7u8; 70_000];
    client.send(WsMessage::Binary(big.clone())).await.unwrap();
    assert_eq!(client.next().await.unwrap().unwrap(), WsMessage::Binary(big));

    client.send(WsMessage::Ping(vec![1, 2, 3])).await.unwrap();
    assert_eq!(
        client.next().await.unwrap().unwrap(),
        WsMessage::Pong(vec![1, 2, 3])
    );

    client.close(None).await.unwrap();
}

#[tokio::test]
async fn test_plain_http_request() {
    let addr = spawn_server().await;
    let out = raw(
        addr,
        "GET /hello/world HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\nhello, world"));
}

#[tokio::test]
async fn test_no_route_and_no_method_over_the_wire() {
    let addr = spawn_server().await;

    let out = raw(
        addr,
        "POST /hello/world HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(out.contains("allow: GET\r\n"));

    let out = raw(
        addr,
        "GET /missing HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[tokio::test]
async fn test_upgrade_required_for_ws_route() {
    let addr = spawn_server().await;
    let out = raw(addr, "GET /ws HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n").await;
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}
