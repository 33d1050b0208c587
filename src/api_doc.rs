use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Security scheme configuration for OpenAPI
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        // Get or create components section
        let components = openapi.components.get_or_insert_with(Default::default);

        // Add bearer token security scheme
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// API documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Realtime Chat Backend API",
        version = "0.1.0",
        description = "REST and WebSocket API for the realtime chat and notification backend"
    ),
    paths(
        // Health check endpoints
        crate::routes::health::health_check,
        crate::routes::health::protected_health_check,
        // Chat endpoints
        crate::chat::controller::get_chats,
        crate::chat::controller::create_group_chat,
        crate::chat::controller::create_private_chat,
        crate::chat::controller::delete_chat,
        // Message endpoints
        crate::message::controller::get_chat_messages,
        crate::message::controller::send_message,
        crate::message::controller::mark_messages_read,
        crate::message::controller::delete_message,
        // Notification endpoints
        crate::notification::controller::get_notifications,
        crate::notification::controller::get_unread_count,
        crate::notification::controller::mark_notification_read,
        crate::notification::controller::mark_all_notifications_read,
        crate::notification::controller::record_event
    ),
    components(
        schemas(
            // Health schemas
            crate::routes::health::HealthResponse,
            // Chat schemas
            crate::chat::model::ChatType,
            crate::chat::model::ParticipantRole,
            crate::chat::model::UserBrief,
            crate::chat::model::ParticipantInfo,
            crate::chat::model::LastMessagePreview,
            crate::chat::model::CreateGroupChatRequest,
            crate::chat::model::CreatePrivateChatRequest,
            crate::chat::model::ChatResponse,
            crate::chat::model::ChatsListResponse,
            crate::chat::model::ChatErrorResponse,
            // Message schemas
            crate::message::model::MessageType,
            crate::message::model::Attachment,
            crate::message::model::SendMessageRequest,
            crate::message::model::ReplyPreview,
            crate::message::model::ReactionEntry,
            crate::message::model::ReactionCount,
            crate::message::model::MessageResponse,
            crate::message::model::MessagePreview,
            crate::message::model::MessagesListResponse,
            crate::message::model::MessageErrorResponse,
            // Notification schemas
            crate::notification::model::NotificationKind,
            crate::notification::model::TargetKind,
            crate::notification::model::NotificationTarget,
            crate::notification::model::RecordEventRequest,
            crate::notification::model::NotificationResponse,
            crate::notification::model::NotificationsListResponse,
            crate::notification::model::UnreadCountResponse,
            crate::notification::model::NotificationErrorResponse,
            // External type schemas
            crate::schema_ext::DateTimeWrapper,
            crate::schema_ext::UuidWrapper
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "chats", description = "Chat lifecycle and membership endpoints"),
        (name = "messages", description = "Message history, sending, and read-state endpoints"),
        (name = "notifications", description = "Notification feed and event ingestion endpoints")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;
