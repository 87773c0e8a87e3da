// WebSocket sessions: one connection per client, job events pushed as JSON

use assay_common::JobEvent;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{metrics, AppState};

/// GET /ws - Open a client session
pub async fn session_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_session(socket, state))
}

async fn serve_session(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    let hub = state.hub().clone();
    let mut events = hub.register(session_id.clone());
    metrics::session_opened();
    info!(session_id = %session_id, "session connected");

    let (mut sink, mut stream) = socket.split();

    // The client learns its id first and quotes it back as socketId
    let hello = JobEvent::Session {
        id: session_id.clone(),
    };
    let greeted = match encode(&hello) {
        Some(text) => sink.send(Message::Text(text)).await.is_ok(),
        None => false,
    };

    if greeted {
        let mut send_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(text) = encode(&event) else { continue };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let sid = session_id.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Close(_)) => break,
                    Ok(_) => debug!(session_id = %sid, "ignoring client message"),
                    Err(e) => {
                        debug!(session_id = %sid, error = %e, "socket read failed");
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }
    }

    // Jobs still holding this id fall back to logging
    hub.unregister(&session_id);
    metrics::session_closed();
    info!(session_id = %session_id, "session disconnected");
}

fn encode(event: &JobEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, kind = event.kind(), "failed to encode event");
            None
        }
    }
}
