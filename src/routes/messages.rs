use crate::auth::middleware::auth_middleware;
use crate::message::controller::{
    delete_message, get_chat_messages, mark_messages_read, send_message,
};
use crate::message::service::MessageService;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

/// Create a router for message routes
pub fn routes(message_service: Arc<MessageService>) -> Router {
    Router::new()
        .route(
            "/api/chats/:id/messages",
            get(get_chat_messages).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/chats/:id/messages",
            post(send_message).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/chats/:id/read",
            post(mark_messages_read).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/messages/:id",
            delete(delete_message).route_layer(middleware::from_fn(auth_middleware)),
        )
        .layer(axum::extract::Extension(message_service))
}
