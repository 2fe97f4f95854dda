//! WebSocket bridging through the gateway.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

mod common;

async fn echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            if socket.send(message).await.is_err() {
                break;
            }
        }
    })
}

async fn start_echo_backend() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().route("/ws", get(echo));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test]
async fn test_messages_flow_both_ways() {
    let port = start_echo_backend().await;
    let gateway = common::start_gateway(common::gateway_config(port)).await;
    let addr = gateway.addr("frontend").unwrap();

    let (mut socket, response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    for text in ["ping", "second frame"] {
        socket.send(Message::text(text)).await.unwrap();
        let reply = socket.next().await.unwrap().unwrap();
        assert_eq!(reply.to_text().unwrap(), text);
    }

    socket.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    assert_eq!(&reply.into_data()[..], &[1u8, 2, 3]);

    socket.close(None).await.unwrap();
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_upstream_closes_with_1011() {
    let gateway = common::start_gateway(common::gateway_config(common::closed_port())).await;
    let addr = gateway.addr("frontend").unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    match socket.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1011),
        other => panic!("expected close frame, got {other:?}"),
    }

    gateway.shutdown().await;
}
