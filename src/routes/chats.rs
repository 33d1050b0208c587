use crate::auth::middleware::auth_middleware;
use crate::chat::controller::{create_group_chat, create_private_chat, delete_chat, get_chats};
use crate::chat::service::ChatService;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

/// Create a router for chat routes
pub fn routes(chat_service: Arc<ChatService>) -> Router {
    Router::new()
        .route(
            "/api/chats",
            get(get_chats).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/chats",
            post(create_group_chat).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/chats/private",
            post(create_private_chat).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/chats/:id",
            delete(delete_chat).route_layer(middleware::from_fn(auth_middleware)),
        )
        .layer(axum::extract::Extension(chat_service))
}
