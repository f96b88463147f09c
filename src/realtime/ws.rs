use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::{auth::AuthUser, extract::ApiPath, groups, AppResult, AppState};

use super::{Event, Realtime, Topic, TopicKind};

#[debug_handler(state = AppState)]
pub(super) async fn subscribe(
    State(db_pool): State<SqlitePool>,
    State(realtime): State<Realtime>,
    AuthUser(user): AuthUser,
    ApiPath((kind, id)): ApiPath<(TopicKind, String)>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    if matches!(kind, TopicKind::Messages | TopicKind::GroupParticipants) {
        groups::require_member(&db_pool, &id, &user.id).await?;
    }

    let topic = Topic::new(kind, id);
    // subscribe before the upgrade so nothing published meanwhile is lost
    let rx = realtime.subscribe(&topic);
    debug!(%topic, user_id = %user.id, "realtime subscriber joined");

    Ok(ws.on_upgrade(move |socket| forward(socket, rx)))
}

async fn forward(socket: WebSocket, mut rx: broadcast::Receiver<Event>) {
    let (mut sender, mut receiver) = socket.split();

    let mut broadcast_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "realtime subscriber fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // inbound frames carry nothing; reading only detects the close
    let mut receive_task =
        tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    tokio::select! {
        _ = &mut broadcast_task => receive_task.abort(),
        _ = &mut receive_task => broadcast_task.abort(),
    };
}
