//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Complete the upgrade handshake with the caller
//! - Establish a WebSocket connection to the upstream
//! - Forward messages in both directions until either side closes
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── WebSocket frames ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Message-level forwarding, no buffering
//! - Close frames propagated in both directions
//! - Upstream connect failure closes the caller with 1011

use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;

/// Close code sent to the caller when the upstream cannot be reached.
pub const CLOSE_UPSTREAM_UNAVAILABLE: u16 = 1011;

/// Accept the caller's upgrade and bridge it to `upstream_url`.
pub fn bridge(ws: WebSocketUpgrade, upstream_url: String, headers: HeaderMap, service: String) -> Response<Body> {
    ws.on_upgrade(move |client| async move {
        let request = match upstream_url.as_str().into_client_request() {
            Ok(mut request) => {
                request.headers_mut().extend(headers);
                request
            }
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Invalid upstream WebSocket URL");
                close_unavailable(client, "Invalid upstream address").await;
                return;
            }
        };

        match tokio_tungstenite::connect_async(request).await {
            Ok((upstream, _)) => {
                tracing::debug!(service = %service, url = %upstream_url, "WebSocket bridge established");
                pump(client, upstream).await;
                tracing::debug!(service = %service, "WebSocket bridge closed");
            }
            Err(e) => {
                tracing::warn!(service = %service, url = %upstream_url, error = %e, "Upstream WebSocket connect failed");
                close_unavailable(client, "Upstream unavailable").await;
            }
        }
    })
}

async fn close_unavailable(mut client: WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: CLOSE_UPSTREAM_UNAVAILABLE,
        reason: reason.to_owned().into(),
    };
    let _ = client.send(Message::Close(Some(frame))).await;
}

async fn pump<S>(client: WebSocket, upstream: tokio_tungstenite::WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let closing = matches!(message, Message::Close(_));
            if upstream_tx.send(to_upstream(message)).await.is_err() || closing {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let Some(message) = from_upstream(message) else {
                continue;
            };
            let closing = matches!(message, Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
}

fn to_upstream(message: Message) -> UpstreamMessage {
    match message {
        Message::Text(text) => UpstreamMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(data) => UpstreamMessage::Ping(data),
        Message::Pong(data) => UpstreamMessage::Pong(data),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

/// Raw frames never surface from a reading stream; they are dropped.
fn from_upstream(message: UpstreamMessage) -> Option<Message> {
    Some(match message {
        UpstreamMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
        UpstreamMessage::Binary(data) => Message::Binary(data),
        UpstreamMessage::Ping(data) => Message::Ping(data),
        UpstreamMessage::Pong(data) => Message::Pong(data),
        UpstreamMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
        UpstreamMessage::Frame(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frames_keep_code_and_reason() {
        let upstream = to_upstream(Message::Close(Some(CloseFrame {
            code: 1001,
            reason: "going away".to_owned().into(),
        })));
        let UpstreamMessage::Close(Some(frame)) = upstream else {
            panic!("expected close frame");
        };
        assert_eq!(u16::from(frame.code), 1001);
        assert_eq!(frame.reason.as_str(), "going away");

        let back = from_upstream(UpstreamMessage::Close(Some(frame))).unwrap();
        assert!(matches!(back, Message::Close(Some(f)) if f.code == 1001));
    }

    #[test]
    fn text_and_binary_pass_through() {
        let text = from_upstream(UpstreamMessage::Text("hi".to_owned().into())).unwrap();
        assert!(matches!(text, Message::Text(t) if t.as_str() == "hi"));

        let binary = to_upstream(Message::Binary(bytes::Bytes::from_static(b"\x01\x02")));
        assert!(matches!(binary, UpstreamMessage::Binary(b) if b.as_ref() == b"\x01\x02"));
    }
}
