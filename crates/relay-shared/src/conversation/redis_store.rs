use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};

use super::{ConversationStore, StoreError, StoreFuture};
use crate::models::Turn;

const DEFAULT_KEY_PREFIX: &str = "relay:conversation:v1";

#[derive(Clone)]
pub struct RedisConversationStore {
    connection: ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisConversationStore {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, StoreError> {
        Self::connect_with_prefix(redis_url, ttl, DEFAULT_KEY_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        ttl: Duration,
        key_prefix: &str,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut health_connection = connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut health_connection)
            .await?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.trim_end_matches(':').to_string(),
            ttl_seconds: ttl.as_secs().max(1),
        })
    }

    fn conversation_key(&self, conversation_id: &str) -> String {
        format!("{}:{}", self.key_prefix, hashed_label(conversation_id))
    }
}

impl ConversationStore for RedisConversationStore {
    fn load<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, Option<Vec<Turn>>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let raw: Option<String> = connection.get(self.conversation_key(conversation_id)).await?;

            raw.map(|raw| {
                serde_json::from_str::<Vec<Turn>>(&raw)
                    .map_err(|err| StoreError::InvalidData(err.to_string()))
            })
            .transpose()
        })
    }

    fn replace<'a>(&'a self, conversation_id: &'a str, turns: Vec<Turn>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let raw = serde_json::to_string(&turns)
                .map_err(|err| StoreError::InvalidData(err.to_string()))?;
            let mut connection = self.connection.clone();
            connection
                .set_ex::<_, _, ()>(
                    self.conversation_key(conversation_id),
                    raw,
                    self.ttl_seconds,
                )
                .await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let removed: i64 = connection.del(self.conversation_key(conversation_id)).await?;
            Ok(removed > 0)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            redis::cmd("PING")
                .query_async::<String>(&mut connection)
                .await?;
            Ok(())
        })
    }
}

fn hashed_label(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()
}
