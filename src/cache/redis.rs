use redis::{AsyncCommands, Client, RedisError};
use tracing::{debug, info};
use uuid::Uuid;

// Redis cache key prefixes
pub const USER_CHANNEL_PREFIX: &str = "notifications:user";
pub const CHAT_LIST_KEY_PREFIX: &str = "chats:user";
const CHAT_LIST_TTL_SECONDS: u64 = 300; // 5 minutes
const FLOOD_WINDOW_SECONDS: u64 = 10;
const FLOOD_MAX_MESSAGES: i64 = 20;

/// Mailbox channel name for a user's personal events.
pub fn user_channel(user_id: &Uuid) -> String {
    format!("{}:{}", USER_CHANNEL_PREFIX, user_id)
}

#[derive(Debug, Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub fn new(client: Client) -> Self {
        // Connection validation happens on first use
        Self { client }
    }

    // Get the client
    pub fn get_client(&self) -> &Client {
        &self.client
    }

    /// Publish a payload on a user's mailbox channel.
    ///
    /// Every live connection for the user is subscribed to this channel,
    /// on this instance or any other.
    pub async fn publish_user_event(&self, user_id: &Uuid, json: &str) -> Result<(), RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = user_channel(user_id);
        let _: () = conn.publish(&channel, json).await?;
        debug!("Published event to channel {}", channel);
        Ok(())
    }

    /// Sliding-window flood guard for message sends.
    ///
    /// Returns true when the sender is over the window limit.
    pub async fn check_message_flood(&self, user_id: &Uuid) -> Result<bool, RedisError> {
        let key = format!("flood:messages:{}", user_id);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&key, FLOOD_WINDOW_SECONDS as i64).await?;
        }

        Ok(count > FLOOD_MAX_MESSAGES)
    }

    // Get a user's cached chat list
    pub async fn get_chat_list(&self, user_id: &Uuid) -> Result<Option<String>, RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}:{}", CHAT_LIST_KEY_PREFIX, user_id);

        let result: Option<String> = conn.get(&key).await?;

        if result.is_some() {
            info!("Cache hit for chat list of user {}", user_id);
        } else {
            info!("Cache miss for chat list of user {}", user_id);
        }

        Ok(result)
    }

    // Cache a user's chat list
    pub async fn cache_chat_list(&self, user_id: &Uuid, json_data: &str) -> Result<(), RedisError> {
        let key = format!("{}:{}", CHAT_LIST_KEY_PREFIX, user_id);
        self.client
            .get_multiplexed_async_connection()
            .await?
            .set_ex(key, json_data, CHAT_LIST_TTL_SECONDS)
            .await
            .map(|_: ()| ())
    }

    /// Invalidate the cached chat list for every affected participant.
    pub async fn invalidate_chat_lists(&self, user_ids: &[Uuid]) -> Result<(), RedisError> {
        if user_ids.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = user_ids
            .iter()
            .map(|id| format!("{}:{}", CHAT_LIST_KEY_PREFIX, id))
            .collect();

        self.client
            .get_multiplexed_async_connection()
            .await?
            .del(keys)
            .await
            .map(|_: ()| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_channel_format() {
        let user_id = Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").unwrap();
        assert_eq!(
            user_channel(&user_id),
            "notifications:user:123e4567-e89b-12d3-a456-426614174000"
        );
    }
}
