//! State-change subscription endpoint (§6: "subscribe to state-change
//! notifications"). Grounded in the same split-sink `ws.rs` handler shape,
//! bridging the synchronous [`RegistryObserver`](crate::observer::RegistryObserver)
//! callback into an async stream via [`ChannelObserver`].

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::StreamExt;
use tokio::sync::mpsc;

use crate::api::AdminState;
use crate::observer::ChannelObserver;

pub async fn events_handler(State(state): State<AdminState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AdminState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state
        .registry
        .subscribe(Arc::new(ChannelObserver(tx)))
        .await;

    loop {
        tokio::select! {
            change = rx.recv() => {
                match change {
                    Some(change) => {
                        let text = serde_json::to_string(&change)
                            .unwrap_or_else(|_| "{}".to_string());
                        if sender.send(Message::Text(text.into())).await.is_err() {
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
}
