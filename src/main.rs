mod api_doc;
mod auth;
mod cache;
mod chat;
mod db;
mod maintenance;
mod message;
mod notification;
mod presence;
mod routes;
mod schema_ext;
mod websocket;

use axum::{routing::get, Router};
use dotenv::dotenv;
use redis::Client;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_doc::ApiDoc;
use crate::cache::redis::RedisCache;
use crate::chat::service::ChatService;
use crate::message::service::MessageService;
use crate::notification::service::NotificationService;
use crate::presence::service::PresenceService;
use crate::presence::store::PresenceStore;
use crate::websocket::chat::ChatSocketState;
use crate::websocket::fanout::{Broadcaster, ChatFanout};

// Simple app config struct
#[derive(Debug, Clone)]
struct AppConfig {
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    tracing_subscriber::fmt::init();

    // Load .env file if it exists
    dotenv().ok();

    // Create connection pool
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&std::env::var("DATABASE_URL")?)
        .await?;

    // Check if the database is initialized
    if !db::check_db_initialized(&pool).await {
        db::init_db(&pool).await?;
    }

    let app_config = AppConfig {
        redis_url: std::env::var("REDIS_URL").ok(),
    };

    // Initialize Redis if configured
    let redis_cache = if let Some(url) = &app_config.redis_url {
        info!("Initializing Redis with URL: {}", url);
        match Client::open(url.clone()) {
            Ok(client) => Some(Arc::new(RedisCache::new(client))),
            Err(e) => {
                error!("Failed to connect to Redis: {}", e);
                None
            }
        }
    } else {
        info!("No Redis URL configured, proceeding with in-process delivery only");
        None
    };

    let redis_cache_for_services = redis_cache.as_ref().map(|arc| (**arc).clone());

    // Fanout is constructed once and injected everywhere that broadcasts
    let fanout = Arc::new(ChatFanout::new(redis_cache.clone()));
    let broadcaster: Arc<dyn Broadcaster> = fanout.clone();

    let presence_store = Arc::new(PresenceStore::new());
    let presence = Arc::new(PresenceService::new(
        presence_store.clone(),
        pool.clone(),
        broadcaster.clone(),
    ));

    let chat_service = Arc::new(ChatService::new(
        pool.clone(),
        redis_cache_for_services.clone(),
    ));
    let message_service = Arc::new(MessageService::new(
        pool.clone(),
        redis_cache_for_services.clone(),
        chat_service.clone(),
        presence_store.clone(),
        broadcaster.clone(),
    ));
    let notification_service = Arc::new(NotificationService::new(
        pool.clone(),
        broadcaster.clone(),
    ));

    // Background notification hygiene
    maintenance::spawn_notification_sweeper(pool.clone());

    let socket_state = Arc::new(ChatSocketState {
        fanout: fanout.clone(),
        presence: presence.clone(),
        chat_service: chat_service.clone(),
        message_service: message_service.clone(),
        redis_cache: redis_cache.clone(),
    });

    // Build the router
    let app = Router::new()
        // API documentation
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Health routes
        .merge(routes::health::routes(pool.clone()))
        // Chat routes
        .merge(routes::chats::routes(chat_service.clone()))
        // Message routes
        .merge(routes::messages::routes(message_service.clone()))
        // Notification + WebSocket routes
        .merge(routes::notifications::routes(notification_service.clone()))
        .merge(routes::notifications::websocket_routes(socket_state))
        // Welcome route
        .route(
            "/",
            get(|| async { "Welcome to Realtime Chat Backend API" }),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Try different ports
    let mut port = 9500;
    let max_tries = 5;
    for attempt in 1..=max_tries {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        match axum::Server::try_bind(&addr) {
            Ok(server) => {
                println!(
                    "🚀 Server started successfully at http://localhost:{}",
                    port
                );
                println!("📄 API Documentation: http://localhost:{}/docs", port);
                println!(
                    "🔌 Chat WebSocket API: ws://localhost:{}/api/chat/ws?token=<JWT>",
                    port
                );
                return server
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| e.into());
            }
            Err(_) => {
                if attempt == max_tries {
                    return Err("Failed to bind to any port".into());
                }
                port += 1;
            }
        }
    }

    Err("Failed to bind to any port".into())
}
