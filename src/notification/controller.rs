use crate::auth::middleware::AuthUser;
use crate::notification::model::{
    NotificationError, NotificationErrorResponse, NotificationsListResponse, RecordEventRequest,
    UnreadCountResponse,
};
use crate::notification::service::NotificationService;
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
pub struct NotificationsQueryParams {
    #[schema(example = "1")]
    page: Option<i64>,
}

// Helper function to convert NotificationError to HTTP response
fn notification_error_to_response(
    err: NotificationError,
) -> (StatusCode, Json<NotificationErrorResponse>) {
    let (status, error_message, code) = match err {
        NotificationError::DatabaseError(e) => {
            error!("Database error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error",
                "DB_ERROR",
            )
        }
        NotificationError::CacheError(e) => {
            error!("Cache error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cache error",
                "CACHE_ERROR",
            )
        }
        NotificationError::NotFound => {
            (StatusCode::NOT_FOUND, "Notification not found", "NOT_FOUND")
        }
        NotificationError::ActorNotFound => {
            (StatusCode::NOT_FOUND, "Actor not found", "ACTOR_NOT_FOUND")
        }
        NotificationError::InternalError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "INTERNAL_ERROR",
        ),
    };

    (
        status,
        Json(NotificationErrorResponse {
            error: error_message.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Fetch the caller's notification feed
#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    params(NotificationsQueryParams),
    responses(
        (status = 200, description = "Notification feed", body = NotificationsListResponse),
        (status = 401, description = "Unauthorized", body = NotificationErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_notifications(
    Extension(user): Extension<AuthUser>,
    Extension(notification_service): Extension<Arc<NotificationService>>,
    Query(params): Query<NotificationsQueryParams>,
) -> impl IntoResponse {
    let notifications = match notification_service
        .get_user_notifications(&user.user_id, params.page)
        .await
    {
        Ok(notifications) => notifications,
        Err(e) => return notification_error_to_response(e).into_response(),
    };

    match notification_service.unread_count(&user.user_id).await {
        Ok(unread_count) => (
            StatusCode::OK,
            Json(NotificationsListResponse {
                notifications,
                page: params.page.unwrap_or(1),
                unread_count,
            }),
        )
            .into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Unread notification count
#[utoipa::path(
    get,
    path = "/api/notifications/unread_count",
    tag = "notifications",
    responses(
        (status = 200, description = "Unread count", body = UnreadCountResponse),
        (status = 401, description = "Unauthorized", body = NotificationErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_unread_count(
    Extension(user): Extension<AuthUser>,
    Extension(notification_service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    match notification_service.unread_count(&user.user_id).await {
        Ok(unread_count) => {
            (StatusCode::OK, Json(UnreadCountResponse { unread_count })).into_response()
        }
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Mark one notification as read
#[utoipa::path(
    post,
    path = "/api/notifications/{id}/read",
    tag = "notifications",
    params(("id" = i64, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Marked read"),
        (status = 404, description = "Notification not found", body = NotificationErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_notification_read(
    Path(notification_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Extension(notification_service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    match notification_service
        .mark_as_read(notification_id, &user.user_id)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "read": notification_id })),
        )
            .into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Mark every notification as read
#[utoipa::path(
    post,
    path = "/api/notifications/read_all",
    tag = "notifications",
    responses(
        (status = 200, description = "All marked read")
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_all_notifications_read(
    Extension(user): Extension<AuthUser>,
    Extension(notification_service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    match notification_service.mark_all_read(&user.user_id).await {
        Ok(marked) => (
            StatusCode::OK,
            Json(serde_json::json!({ "marked_read": marked })),
        )
            .into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Record a notable event from the engagement layer
///
/// The authenticated caller is the actor. Self-notifications are
/// suppressed and return no notification.
#[utoipa::path(
    post,
    path = "/api/notifications/events",
    tag = "notifications",
    request_body = RecordEventRequest,
    responses(
        (status = 201, description = "Notification created or merged", body = NotificationResponse),
        (status = 204, description = "Suppressed self-notification"),
        (status = 404, description = "Actor not found", body = NotificationErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn record_event(
    Extension(user): Extension<AuthUser>,
    Extension(notification_service): Extension<Arc<NotificationService>>,
    Json(request): Json<RecordEventRequest>,
) -> impl IntoResponse {
    match notification_service
        .record_event(
            &user.user_id,
            &request.recipient_id,
            request.kind,
            request.target,
        )
        .await
    {
        Ok(Some(notification)) => (StatusCode::CREATED, Json(notification)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}
