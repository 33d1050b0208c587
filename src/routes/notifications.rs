use crate::auth::middleware::auth_middleware;
use crate::notification::controller::{
    get_notifications, get_unread_count, mark_all_notifications_read, mark_notification_read,
    record_event,
};
use crate::notification::service::NotificationService;
use crate::websocket::chat::{ws_handler, ChatSocketState};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create a router for notification routes
pub fn routes(notification_service: Arc<NotificationService>) -> Router {
    Router::new()
        .route(
            "/api/notifications",
            get(get_notifications).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/notifications/unread_count",
            get(get_unread_count).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/notifications/:id/read",
            post(mark_notification_read).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/notifications/read_all",
            post(mark_all_notifications_read).route_layer(middleware::from_fn(auth_middleware)),
        )
        .route(
            "/api/notifications/events",
            post(record_event).route_layer(middleware::from_fn(auth_middleware)),
        )
        .layer(axum::extract::Extension(notification_service))
}

/// Create a router for the chat WebSocket endpoint
pub fn websocket_routes(socket_state: Arc<ChatSocketState>) -> Router {
    Router::new()
        .route("/api/chat/ws", get(ws_handler))
        .with_state(socket_state)
}
