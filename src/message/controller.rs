use crate::auth::middleware::AuthUser;
use crate::message::model::{
    MessageError, MessageErrorResponse, MessagesListResponse, SendMessageRequest,
};
use crate::message::service::MessageService;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::{IntoParams, ToSchema};

// Query parameters for pagination
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct MessagesQueryParams {
    #[schema(example = "1")]
    page: Option<i64>,
}

// Helper function to convert MessageError to HTTP response
fn message_error_to_response(err: MessageError) -> (StatusCode, Json<MessageErrorResponse>) {
    let (status, error_message, code) = match err {
        MessageError::DatabaseError(e) => {
            error!("Database error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error",
                "DB_ERROR",
            )
        }
        MessageError::CacheError(e) => {
            error!("Cache error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cache error",
                "CACHE_ERROR",
            )
        }
        MessageError::NotFound => (StatusCode::NOT_FOUND, "Message not found", "NOT_FOUND"),
        MessageError::ChatNotFound => {
            (StatusCode::NOT_FOUND, "Chat not found", "CHAT_NOT_FOUND")
        }
        MessageError::NotAParticipant => (
            StatusCode::FORBIDDEN,
            "Not a participant of this chat",
            "NOT_A_PARTICIPANT",
        ),
        MessageError::Unauthorized => (
            StatusCode::FORBIDDEN,
            "Not authorized to perform this action",
            "UNAUTHORIZED",
        ),
        MessageError::RateLimitExceeded => (
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded, please try again later",
            "RATE_LIMITED",
        ),
        MessageError::ValidationError(_) => {
            (StatusCode::BAD_REQUEST, "Invalid input", "VALIDATION_ERROR")
        }
        MessageError::InternalError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "INTERNAL_ERROR",
        ),
    };

    (
        status,
        Json(MessageErrorResponse {
            error: error_message.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Fetch a chat's message history
///
/// Newest first; the same order the live channel delivers, reversed by
/// clients for display.
#[utoipa::path(
    get,
    path = "/api/chats/{id}/messages",
    tag = "messages",
    params(
        ("id" = i64, Path, description = "Chat ID"),
        MessagesQueryParams
    ),
    responses(
        (status = 200, description = "Message history", body = MessagesListResponse),
        (status = 403, description = "Not a participant", body = MessageErrorResponse),
        (status = 404, description = "Chat not found", body = MessageErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_chat_messages(
    Path(chat_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Extension(message_service): Extension<Arc<MessageService>>,
    Query(params): Query<MessagesQueryParams>,
) -> impl IntoResponse {
    match message_service
        .get_chat_messages(chat_id, &user.user_id, params.page)
        .await
    {
        Ok(messages) => (
            StatusCode::OK,
            Json(MessagesListResponse {
                messages,
                page: params.page.unwrap_or(1),
            }),
        )
            .into_response(),
        Err(e) => message_error_to_response(e).into_response(),
    }
}

/// Send a message over HTTP
///
/// Same ingest pipeline as the socket path: identical validation,
/// rollups, and fanout.
#[utoipa::path(
    post,
    path = "/api/chats/{id}/messages",
    tag = "messages",
    params(("id" = i64, Path, description = "Chat ID")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent", body = MessageResponse),
        (status = 400, description = "Invalid input", body = MessageErrorResponse),
        (status = 403, description = "Not a participant", body = MessageErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = MessageErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn send_message(
    Path(chat_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Extension(message_service): Extension<Arc<MessageService>>,
    Json(request): Json<SendMessageRequest>,
) -> impl IntoResponse {
    match message_service
        .send_message(chat_id, &user.user_id, request)
        .await
    {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(e) => message_error_to_response(e).into_response(),
    }
}

/// Mark every message in a chat as read
///
/// Idempotent; repeated calls yield the same ledger state.
#[utoipa::path(
    post,
    path = "/api/chats/{id}/read",
    tag = "messages",
    params(("id" = i64, Path, description = "Chat ID")),
    responses(
        (status = 200, description = "Messages marked read"),
        (status = 403, description = "Not a participant", body = MessageErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_messages_read(
    Path(chat_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Extension(message_service): Extension<Arc<MessageService>>,
) -> impl IntoResponse {
    match message_service
        .mark_messages_read(chat_id, &user.user_id, None)
        .await
    {
        Ok(marked) => (
            StatusCode::OK,
            Json(serde_json::json!({ "marked_read": marked })),
        )
            .into_response(),
        Err(e) => message_error_to_response(e).into_response(),
    }
}

/// Soft delete a message (sender or chat admin)
#[utoipa::path(
    delete,
    path = "/api/messages/{id}",
    tag = "messages",
    params(("id" = i64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Message deleted"),
        (status = 403, description = "Not allowed", body = MessageErrorResponse),
        (status = 404, description = "Message not found", body = MessageErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_message(
    Path(message_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Extension(message_service): Extension<Arc<MessageService>>,
) -> impl IntoResponse {
    match message_service.delete_message(message_id, &user.user_id).await {
        Ok(deleted) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deleted": deleted })),
        )
            .into_response(),
        Err(e) => message_error_to_response(e).into_response(),
    }
}
