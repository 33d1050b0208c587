use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::jwt::verify_connection_identity;
use crate::cache::redis::{user_channel, RedisCache};
use crate::chat::model::ChatError;
use crate::chat::service::ChatService;
use crate::message::model::MessageError;
use crate::message::service::MessageService;
use crate::presence::service::PresenceService;
use crate::websocket::events::{ClientEvent, ServerEvent};
use crate::websocket::fanout::{Broadcaster, ChatFanout, ConnId};

/// Query parameters for WebSocket connections
#[derive(Debug, Deserialize)]
pub struct WebSocketParams {
    token: Option<String>,
}

/// Shared state for the chat socket endpoint
pub struct ChatSocketState {
    pub fanout: Arc<ChatFanout>,
    pub presence: Arc<PresenceService>,
    pub chat_service: Arc<ChatService>,
    pub message_service: Arc<MessageService>,
    pub redis_cache: Option<Arc<RedisCache>>,
}

/// Handle an invalid socket connection (authentication failure)
async fn handle_invalid_socket(mut socket: WebSocket, error_message: String) {
    let payload = ServerEvent::error(error_message).to_json();
    if let Err(e) = socket.send(Message::Text(payload)).await {
        error!("Error sending error message on WS: {}", e);
    }

    // Close before any room operation is possible
    let _ = socket.close().await;
}

/// Handle incoming WebSocket connection
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WebSocketParams>,
    State(state): State<Arc<ChatSocketState>>,
) -> impl IntoResponse {
    let token = params.token.unwrap_or_default();

    // Validate the bearer credential before any room operations
    let user_id = match verify_connection_identity(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            let error_message = format!("Invalid token: {}", e);
            return ws.on_upgrade(move |socket| async move {
                handle_invalid_socket(socket, error_message).await;
            });
        }
    };

    info!("User {} connected to chat WebSocket", user_id);
    ws.on_upgrade(move |socket| async move {
        handle_valid_connection(socket, user_id, state).await;
    })
}

/// Handle a valid WebSocket connection
async fn handle_valid_connection(socket: WebSocket, user_id: Uuid, state: Arc<ChatSocketState>) {
    let conn_id: ConnId = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Room and direct events arrive from the fanout; mailbox payloads and
    // heartbeats arrive pre-framed
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (raw_tx, mut raw_rx) = mpsc::channel::<Message>(100);

    state.fanout.register(conn_id, user_id, event_tx);
    state.presence.connect(user_id, conn_id).await;

    // Task to subscribe to this user's mailbox channel
    let redis_task = state.redis_cache.clone().map(|cache| {
        let tx = raw_tx.clone();
        tokio::spawn(async move {
            subscribe_to_mailbox(user_id, cache, tx).await;
        })
    });

    // Forward messages from both channels to the WebSocket
    let forward_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => Message::Text(event.to_json()),
                    None => break,
                },
                raw = raw_rx.recv() => match raw {
                    Some(message) => message,
                    None => break,
                },
            };
            if let Err(e) = ws_sender.send(frame).await {
                error!("Error forwarding message to WebSocket: {}", e);
                break;
            }
        }
    });

    // Heartbeat task
    let tx_heartbeat = raw_tx.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            if let Err(e) = tx_heartbeat.send(Message::Ping(vec![])).await {
                error!("Error sending heartbeat: {}", e);
                break;
            }
        }
    });

    // Process incoming WebSocket messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_event(&state, conn_id, user_id, &text).await;
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by client");
                break;
            }
            Ok(Message::Pong(_)) => {
                debug!("Received pong from client");
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Clean up; disconnect handling must run even when the socket died
    // mid-operation
    state.fanout.unregister(conn_id);
    state.presence.disconnect(user_id, conn_id).await;

    if let Some(task) = redis_task {
        task.abort();
    }
    forward_task.abort();
    heartbeat_task.abort();

    info!("WebSocket connection closed for user: {}", user_id);
}

/// Dispatch one inbound client event.
///
/// Membership is re-checked inside the services on every operation;
/// errors go back to the initiating connection only.
async fn handle_client_event(
    state: &Arc<ChatSocketState>,
    conn_id: ConnId,
    user_id: Uuid,
    text: &str,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("Unparseable client event: {}", e);
            state
                .fanout
                .send_conn(conn_id, &ServerEvent::error("Invalid event payload"));
            return;
        }
    };

    match event {
        ClientEvent::JoinChat { chat_id } => {
            match state.chat_service.can_join(&user_id, chat_id).await {
                Ok(true) => {
                    state.fanout.join_room(chat_id, conn_id);
                    state
                        .fanout
                        .send_conn(conn_id, &ServerEvent::JoinedChat { chat_id });
                }
                Ok(false) => {
                    state.fanout.send_conn(
                        conn_id,
                        &ServerEvent::error("You are not a participant of this chat"),
                    );
                }
                Err(e) => {
                    error!("Join check failed for chat {}: {}", chat_id, e);
                    state
                        .fanout
                        .send_conn(conn_id, &ServerEvent::error(chat_error_message(&e)));
                }
            }
        }
        ClientEvent::LeaveChat { chat_id } => {
            state.fanout.leave_room(chat_id, conn_id);
            state
                .fanout
                .send_conn(conn_id, &ServerEvent::LeftChat { chat_id });
        }
        ClientEvent::SendMessage { .. } => {
            let (chat_id, request) = event
                .into_send_request()
                .expect("send_message carries a send request");
            if let Err(e) = state
                .message_service
                .send_message(chat_id, &user_id, request)
                .await
            {
                // A failed send must fail loudly to the sender
                state
                    .fanout
                    .send_conn(conn_id, &ServerEvent::error(message_error_message(&e)));
            }
        }
        ClientEvent::TypingStart { chat_id } => {
            broadcast_typing(state, conn_id, user_id, chat_id, true).await;
        }
        ClientEvent::TypingStop { chat_id } => {
            broadcast_typing(state, conn_id, user_id, chat_id, false).await;
        }
        ClientEvent::AddReaction { message_id, emoji } => {
            if let Err(e) = state
                .message_service
                .add_reaction(message_id, &user_id, &emoji)
                .await
            {
                state
                    .fanout
                    .send_conn(conn_id, &ServerEvent::error(message_error_message(&e)));
            }
        }
        ClientEvent::RemoveReaction { message_id, emoji } => {
            if let Err(e) = state
                .message_service
                .remove_reaction(message_id, &user_id, &emoji)
                .await
            {
                state
                    .fanout
                    .send_conn(conn_id, &ServerEvent::error(message_error_message(&e)));
            }
        }
        ClientEvent::MarkMessagesRead { chat_id } => {
            if let Err(e) = state
                .message_service
                .mark_messages_read(chat_id, &user_id, Some(conn_id))
                .await
            {
                state
                    .fanout
                    .send_conn(conn_id, &ServerEvent::error(message_error_message(&e)));
            }
        }
    }
}

/// Typing indicators: ephemeral, excluded sender, dropped silently under
/// storage pressure.
async fn broadcast_typing(
    state: &Arc<ChatSocketState>,
    conn_id: ConnId,
    user_id: Uuid,
    chat_id: i64,
    started: bool,
) {
    match state.chat_service.can_join(&user_id, chat_id).await {
        Ok(true) => {}
        Ok(false) => {
            state.fanout.send_conn(
                conn_id,
                &ServerEvent::error("You are not a participant of this chat"),
            );
            return;
        }
        Err(e) => {
            debug!("Dropping typing indicator for chat {}: {}", chat_id, e);
            return;
        }
    }

    let user_name = match state.chat_service.resolve_user_brief(&user_id).await {
        Ok(brief) => brief.name,
        Err(e) => {
            debug!("Dropping typing indicator for chat {}: {}", chat_id, e);
            return;
        }
    };

    let event = if started {
        ServerEvent::UserTyping {
            user_id,
            user_name,
            chat_id,
        }
    } else {
        ServerEvent::UserStopTyping {
            user_id,
            user_name,
            chat_id,
        }
    };

    state.fanout.broadcast_room(chat_id, &event, Some(conn_id));
}

/// Subscribe to the user's mailbox channel and forward payloads verbatim.
async fn subscribe_to_mailbox(user_id: Uuid, redis_cache: Arc<RedisCache>, tx: mpsc::Sender<Message>) {
    let channel_name = user_channel(&user_id);
    info!("Subscribing to Redis channel: {}", channel_name);

    if let Ok(mut pubsub) = redis_cache.get_client().get_async_pubsub().await {
        if let Err(e) = pubsub.subscribe(&channel_name).await {
            error!("Failed to subscribe to Redis channel: {}", e);
            return;
        }

        info!("Successfully subscribed to Redis channel: {}", channel_name);

        let mut pubsub_stream = pubsub.on_message();

        while let Some(msg) = pubsub_stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to get message payload: {}", e);
                    continue;
                }
            };

            if let Err(e) = tx.send(Message::Text(payload)).await {
                error!("Failed to forward Redis message to WebSocket: {}", e);
                break;
            }
        }
    } else {
        error!("Failed to get Redis PubSub connection");
    }
}

/// User-facing text for chat errors; storage detail stays server-side.
fn chat_error_message(err: &ChatError) -> String {
    match err {
        ChatError::DatabaseError(_) | ChatError::CacheError(_) | ChatError::InternalError(_) => {
            "Internal server error".to_string()
        }
        other => other.to_string(),
    }
}

/// User-facing text for message errors.
fn message_error_message(err: &MessageError) -> String {
    match err {
        MessageError::DatabaseError(_)
        | MessageError::CacheError(_)
        | MessageError::InternalError(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_websocket_params() {
        let params = WebSocketParams {
            token: Some("test_token".to_string()),
        };
        assert_eq!(params.token.unwrap(), "test_token");

        let params_empty = WebSocketParams { token: None };
        assert!(params_empty.token.is_none());
    }

    #[test]
    fn test_auth_error_payload_format() {
        let payload = ServerEvent::error("Invalid token").to_json();
        assert!(payload.contains(r#""type":"error"#));
        assert!(payload.contains(r#""message":"Invalid token"#));
    }

    #[test]
    fn test_storage_errors_are_not_leaked() {
        let err = MessageError::InternalError("pool exhausted at 10.0.0.3".to_string());
        assert_eq!(message_error_message(&err), "Internal server error");

        let err = MessageError::RateLimitExceeded;
        assert_eq!(message_error_message(&err), "Rate limit exceeded");

        let err = ChatError::NotAParticipant;
        assert_eq!(chat_error_message(&err), "Not a participant of this chat");
    }
}
