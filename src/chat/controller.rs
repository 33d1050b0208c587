use crate::auth::middleware::AuthUser;
use crate::chat::model::{
    ChatError, ChatErrorResponse, ChatsListResponse, CreateGroupChatRequest,
    CreatePrivateChatRequest,
};
use crate::chat::service::ChatService;
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
pub struct ChatsQueryParams {
    #[schema(example = "1")]
    page: Option<i64>,
}

// Helper function to convert ChatError to HTTP response
fn chat_error_to_response(err: ChatError) -> (StatusCode, Json<ChatErrorResponse>) {
    let (status, error_message, code) = match err {
        ChatError::DatabaseError(e) => {
            error!("Database error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error",
                "DB_ERROR",
            )
        }
        ChatError::CacheError(e) => {
            error!("Cache error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cache error",
                "CACHE_ERROR",
            )
        }
        ChatError::NotFound => (StatusCode::NOT_FOUND, "Chat not found", "NOT_FOUND"),
        ChatError::UserNotFound => (StatusCode::NOT_FOUND, "User not found", "USER_NOT_FOUND"),
        ChatError::NotAParticipant => (
            StatusCode::FORBIDDEN,
            "Not a participant of this chat",
            "NOT_A_PARTICIPANT",
        ),
        ChatError::AdminRequired => (
            StatusCode::FORBIDDEN,
            "Only chat admins can perform this action",
            "ADMIN_REQUIRED",
        ),
        ChatError::ValidationError(_) => {
            (StatusCode::BAD_REQUEST, "Invalid input", "VALIDATION_ERROR")
        }
        ChatError::InternalError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "INTERNAL_ERROR",
        ),
    };

    (
        status,
        Json(ChatErrorResponse {
            error: error_message.to_string(),
            code: code.to_string(),
        }),
    )
}

/// List the caller's chats
///
/// Most recent activity first, with last-message previews and unread counts.
#[utoipa::path(
    get,
    path = "/api/chats",
    tag = "chats",
    params(ChatsQueryParams),
    responses(
        (status = 200, description = "Chat list", body = ChatsListResponse),
        (status = 401, description = "Unauthorized", body = ChatErrorResponse),
        (status = 500, description = "Internal server error", body = ChatErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_chats(
    Extension(user): Extension<AuthUser>,
    Extension(chat_service): Extension<Arc<ChatService>>,
    Query(params): Query<ChatsQueryParams>,
) -> impl IntoResponse {
    match chat_service.get_user_chats(&user.user_id, params.page).await {
        Ok(chats) => (
            StatusCode::OK,
            Json(ChatsListResponse {
                chats,
                page: params.page.unwrap_or(1),
            }),
        )
            .into_response(),
        Err(e) => chat_error_to_response(e).into_response(),
    }
}

/// Create a group chat
#[utoipa::path(
    post,
    path = "/api/chats",
    tag = "chats",
    request_body = CreateGroupChatRequest,
    responses(
        (status = 201, description = "Group chat created", body = ChatResponse),
        (status = 400, description = "Invalid input", body = ChatErrorResponse),
        (status = 401, description = "Unauthorized", body = ChatErrorResponse),
        (status = 404, description = "A member was not found", body = ChatErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_group_chat(
    Extension(user): Extension<AuthUser>,
    Extension(chat_service): Extension<Arc<ChatService>>,
    Json(request): Json<CreateGroupChatRequest>,
) -> impl IntoResponse {
    match chat_service.create_group_chat(&user.user_id, request).await {
        Ok(chat) => (StatusCode::CREATED, Json(chat)).into_response(),
        Err(e) => chat_error_to_response(e).into_response(),
    }
}

/// Open (or fetch) the private chat with another user
///
/// At most one live private chat exists per pair of users; repeated calls
/// return the same chat.
#[utoipa::path(
    post,
    path = "/api/chats/private",
    tag = "chats",
    request_body = CreatePrivateChatRequest,
    responses(
        (status = 200, description = "Private chat", body = ChatResponse),
        (status = 400, description = "Invalid input", body = ChatErrorResponse),
        (status = 404, description = "User not found", body = ChatErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_private_chat(
    Extension(user): Extension<AuthUser>,
    Extension(chat_service): Extension<Arc<ChatService>>,
    Json(request): Json<CreatePrivateChatRequest>,
) -> impl IntoResponse {
    match chat_service
        .get_or_create_private_chat(&user.user_id, &request.user_id)
        .await
    {
        Ok(chat) => (StatusCode::OK, Json(chat)).into_response(),
        Err(e) => chat_error_to_response(e).into_response(),
    }
}

/// Soft delete a chat (admin participants only)
#[utoipa::path(
    delete,
    path = "/api/chats/{id}",
    tag = "chats",
    params(("id" = i64, Path, description = "Chat ID")),
    responses(
        (status = 200, description = "Chat deleted"),
        (status = 403, description = "Not allowed", body = ChatErrorResponse),
        (status = 404, description = "Chat not found", body = ChatErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_chat(
    Path(chat_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Extension(chat_service): Extension<Arc<ChatService>>,
) -> impl IntoResponse {
    match chat_service.soft_delete_chat(chat_id, &user.user_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deleted": chat_id })),
        )
            .into_response(),
        Err(e) => chat_error_to_response(e).into_response(),
    }
}
