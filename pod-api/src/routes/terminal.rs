use crate::{auth::AuthenticatedUser, state::AppState};
use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use bytes::Bytes;
use futures_util::{future, SinkExt, StreamExt};
use pod_orchestrator::TerminalFrame;
use tracing::debug;

pub fn routes() -> Router<AppState> {
    Router::new().route("/terminal", get(terminal_handler))
}

async fn terminal_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user.username))
}

async fn handle_socket(socket: WebSocket, state: AppState, owner: String) {
    let (sender, receiver) = socket.split();

    // Client input ends at the first close frame or read error.
    let input = receiver
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| future::ready(msg.ok().and_then(message_bytes)));

    let output = sender.with(|frame: TerminalFrame| {
        future::ready(Ok::<_, axum::Error>(frame_message(frame)))
    });

    let outcome = state
        .bridge
        .connect(&owner, Box::pin(input), Box::pin(output))
        .await;
    debug!("Terminal socket for {} finished: {:?}", owner, outcome);
}

fn message_bytes(msg: Message) -> Option<Bytes> {
    match msg {
        Message::Binary(data) => Some(data),
        Message::Text(text) => Some(Bytes::copy_from_slice(text.as_str().as_bytes())),
        _ => None,
    }
}

fn frame_message(frame: TerminalFrame) -> Message {
    match frame {
        TerminalFrame::Data(data) => Message::Binary(data),
        TerminalFrame::Close(code) => Message::Close(Some(CloseFrame {
            code: code.code(),
            reason: Utf8Bytes::from(code.reason().to_string()),
        })),
    }
}
