use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use draftboard_core::ids::{connection_id, is_valid_game_id};

use crate::error::AppError;
use crate::hub::{ConnectionId, HubError, HubHandle, HubMessage, Outbound, OutboundReceiver};
use crate::state::AppState;
use crate::store;

/// `GET /websocket/{game_id}`: upgrade and attach the socket to the game's hub.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if !is_valid_game_id(&game_id) {
        return Err(AppError::BadRequest(format!("malformed game id {game_id:?}")));
    }
    let lookup_id = game_id.clone();
    if store::blocking(&state.store, move |s| s.get(&lookup_id)).await?.is_none() {
        return Err(AppError::NotFound(format!("game {game_id} not found")));
    }

    let max_frame = state.config.limits.max_frame_bytes;
    Ok(ws
        .max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state, game_id))
        .into_response())
}

async fn handle_socket(mut socket: WebSocket, state: AppState, game_id: String) {
    let (hub, id, mailbox) = match join_hub(&state, &game_id).await {
        Ok(joined) => joined,
        Err(e) => {
            tracing::warn!(game_id = %game_id, error = %e, "Could not attach connection to hub");
            let frame = CloseFrame {
                code: close_code::AGAIN,
                reason: e.to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        },
    };
    tracing::info!(game_id = %game_id, connection_id = %id, "Connection opened");

    let (sink, stream) = socket.split();
    let cancel = state.directory.shutdown_token().child_token();
    let tracker = state.directory.tracker();
    tracker.spawn(read_loop(stream, hub.clone(), id.clone(), cancel.clone()));
    tracker.spawn(write_loop(sink, mailbox, hub, id, cancel));
}

/// Register under a fresh id, retrying id collisions and hubs that closed
/// between lookup and registration.
async fn join_hub(
    state: &AppState,
    game_id: &str,
) -> Result<(HubHandle, ConnectionId, OutboundReceiver), HubError> {
    let attempts = state.config.limits.max_id_attempts;
    for attempt in 1..=attempts {
        let hub = state.directory.get_or_create(game_id);
        let id = connection_id(game_id, &state.ids.connection_suffix());
        let (tx, rx) = mpsc::channel(state.config.limits.outbound_buffer);
        match hub.register(id.clone(), tx).await {
            Ok(()) => return Ok((hub, id, rx)),
            Err(HubError::DuplicateConnection(_)) => {
                tracing::debug!(game_id, connection_id = %id, attempt, "Connection id collision");
            },
            Err(HubError::Closed) => {
                tracing::debug!(game_id, attempt, "Hub closed during registration, retrying");
            },
            Err(e) => return Err(e),
        }
    }
    Err(HubError::IdsExhausted(attempts))
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: HubHandle,
    id: ConnectionId,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        let payload = match frame {
            Some(Ok(Message::Text(text))) => Bytes::from(text),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Read failed");
                break;
            },
        };

        let submitted = tokio::select! {
            () = cancel.cancelled() => break,
            result = hub.broadcast(HubMessage::from_connection(id.clone(), payload)) => result,
        };
        if submitted.is_err() {
            break;
        }
    }

    cancel.cancel();
    let _ = hub.unregister(id.clone()).await;
    tracing::info!(game_id = hub.game_id(), connection_id = %id, "Connection closed");
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: OutboundReceiver,
    hub: HubHandle,
    id: ConnectionId,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            () = cancel.cancelled() => break,
            item = mailbox.recv() => item,
        };
        let Some(item) = item else {
            tracing::debug!(connection_id = %id, "Mailbox closed by hub");
            break;
        };
        if let Err(e) = sink.send(to_frame(item)).await {
            tracing::debug!(connection_id = %id, error = %e, "Write failed");
            let _ = hub.unregister(id.clone()).await;
            break;
        }
    }

    cancel.cancel();
    let _ = sink.close().await;
}

fn to_frame(item: Outbound) -> Message {
    match item {
        Outbound::Payload(payload) => match Utf8Bytes::try_from(payload.clone()) {
            Ok(text) => Message::Text(text),
            Err(_) => Message::Binary(payload),
        },
        Outbound::Rejected(reason) => {
            Message::Text(serde_json::json!({ "error": reason }).to_string().into())
        },
    }
}
