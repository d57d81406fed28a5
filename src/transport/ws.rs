//! The persistent bidirectional channel. The first frame on every
//! connection must be `login`; everything after is dispatched against
//! the room.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::AppError;
use crate::room::commands;
use crate::transport::messages::{IncomingMessage, OutgoingMessage};
use crate::AppState;

pub async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutgoingMessage>();

    let writer_metrics = state.metrics.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
            writer_metrics.record_ws_frame_out();
        }
    });

    let Some(session_id) = await_login(&mut stream, &state, tx.clone(), tx).await else {
        writer.abort();
        return;
    };

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else { continue };
        state.metrics.record_ws_frame_in();
        let Ok(incoming) = serde_json::from_str::<IncomingMessage>(&text) else { continue };
        if let Err(err) = dispatch(&state, &session_id, incoming).await {
            warn!(%err, session_id = %session_id, "dispatch error");
        }
    }

    {
        let mut room = state.room.lock().await;
        room.sessions.detach_transport(&session_id);
    }
    writer.abort();
}

/// The first inbound frame must be `login`; anything else closes the
/// connection with a `login_error`.
async fn await_login(
    stream: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
    attach_tx: mpsc::UnboundedSender<OutgoingMessage>,
    error_tx: mpsc::UnboundedSender<OutgoingMessage>,
) -> Option<String> {
    let Some(Ok(message)) = stream.next().await else { return None };
    let Message::Text(text) = message else {
        let _ = error_tx.send(OutgoingMessage::LoginError { reason: "first frame must be login".into() });
        return None;
    };
    state.metrics.record_ws_frame_in();

    let incoming: Option<IncomingMessage> = serde_json::from_str(&text).ok();
    let Some(IncomingMessage::Login { session_id }) = incoming else {
        let _ = error_tx.send(OutgoingMessage::LoginError { reason: "first frame must be login".into() });
        return None;
    };

    match commands::handle_login(state, &session_id, attach_tx).await {
        Ok(()) => Some(session_id),
        Err(err) => {
            let _ = error_tx.send(OutgoingMessage::LoginError { reason: err.to_string() });
            None
        }
    }
}

async fn dispatch(state: &AppState, session_id: &str, message: IncomingMessage) -> Result<(), AppError> {
    match message {
        IncomingMessage::Login { .. } => Ok(()),
        IncomingMessage::GetTracks => commands::send_tracks_list(state, session_id).await,
        IncomingMessage::GetSessions => commands::send_sessions_list(state, session_id).await,
        IncomingMessage::GetPlayHistory => commands::send_play_history(state, session_id).await,
        IncomingMessage::Ping => commands::heartbeat(state, session_id).await,
        IncomingMessage::RemoveTrack { uri } => commands::remove_track(state, &uri).await,
        IncomingMessage::DelayTrack { uri } => {
            commands::delay_track(state, &uri).await;
            Ok(())
        }
        IncomingMessage::Jam { uri, unjam } => commands::jam(state, session_id, &uri, unjam.unwrap_or(false)).await,
        IncomingMessage::MasterPlay => commands::master_play(state, session_id).await,
        IncomingMessage::MasterPause => commands::master_pause(state, session_id).await,
        IncomingMessage::MasterSkip => commands::master_skip(state, session_id).await,
        IncomingMessage::StartFallback => commands::start_fallback(state).await,
        IncomingMessage::SessionPlay => commands::session_play(state, session_id).await,
        IncomingMessage::SessionPause => commands::session_pause(state, session_id).await,
        IncomingMessage::Airhorn { name } => commands::airhorn(state, session_id, name).await,
        IncomingMessage::TakeMasterControl => commands::take_master_control(state, session_id).await,
        IncomingMessage::HistoryMessage { text } => commands::history_message(state, session_id, text).await,
    }
}
