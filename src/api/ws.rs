//! WebSocket upgrade handling (§4.7, §6: "clients open a WebSocket-style
//! upgrade to ws://host:port<path>"). Grounded in
//! `brew-lab-thaumic-cast`'s `api/ws.rs` split-sink/split-stream handler
//! shape, simplified to this crate's one-directional fanout (no client
//! command messages — "the server sends bytes only... no control
//! messages", §6).

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{OriginalUri, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::StreamExt;

use crate::api::StreamState;

pub async fn ws_handler(
    State(state): State<StreamState>,
    OriginalUri(uri): OriginalUri,
    ws: WebSocketUpgrade,
) -> Response {
    let path = uri.path().to_string();
    match state.registry.instance_for_route(state.port, &path).await {
        Some(instance) => ws.on_upgrade(move |socket| handle_socket(socket, instance)),
        None => (StatusCode::NOT_FOUND, "no stream registered at this path").into_response(),
    }
}

async fn handle_socket(socket: WebSocket, instance: std::sync::Arc<crate::instance::Instance>) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = instance.subscriber_arrives().await;

    // The client never sends anything meaningful (§6); `receiver` is
    // polled only to notice the socket closing so the forwarding loop can
    // exit and clean up the subscriber.
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(bytes) => {
                        if sender.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    instance.subscriber_left(id).await;
}
