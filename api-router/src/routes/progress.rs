//! WebSocket progress subscription (section 4.6 / section 6). A client
//! connects, sends one `subscribe_upload` message, and then receives the
//! subscribed upload's `Event` stream verbatim (tagged JSON) until a
//! terminal event closes the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;

use crate::api_state::ApiState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage {
    #[serde(rename = "subscribe_upload")]
    SubscribeUpload { upload_id: String },
}

pub async fn progress_ws(State(state): State<ApiState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ApiState) {
    let Some(Ok(Message::Text(text))) = socket.recv().await else {
        return;
    };

    let ClientMessage::SubscribeUpload { upload_id } = match serde_json::from_str(&text) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "progress socket: malformed subscribe message");
            return;
        }
    };

    let mut subscription = state.broadcaster.subscribe(&upload_id);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let terminal = event.is_terminal();
                let Ok(payload) = serde_json::to_string(&event) else {
                    break;
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }
}
