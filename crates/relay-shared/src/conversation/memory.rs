use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{ConversationStore, StoreFuture};
use crate::models::Turn;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone)]
struct StoredConversation {
    turns: Vec<Turn>,
    expires_at: DateTime<Utc>,
}

type Shard = Mutex<HashMap<String, StoredConversation>>;

/// Process-local conversation store.
///
/// Entries are spread over independently locked shards so operations on one
/// conversation never wait on unrelated ones.
#[derive(Clone)]
pub struct InMemoryConversationStore {
    shards: Arc<[Shard]>,
    hasher: RandomState,
    ttl: chrono::Duration,
}

impl InMemoryConversationStore {
    pub fn new(ttl: Duration) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>();

        Self {
            shards: shards.into(),
            hasher: RandomState::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn load_at(&self, conversation_id: &str, now: DateTime<Utc>) -> Option<Vec<Turn>> {
        let mut shard = self.lock_shard(conversation_id);
        match shard.get(conversation_id) {
            Some(entry) if now < entry.expires_at => Some(entry.turns.clone()),
            Some(_) => {
                shard.remove(conversation_id);
                None
            }
            None => None,
        }
    }

    pub fn replace_at(&self, conversation_id: &str, turns: Vec<Turn>, now: DateTime<Utc>) {
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.lock_shard(conversation_id).insert(
            conversation_id.to_string(),
            StoredConversation { turns, expires_at },
        );
    }

    pub fn remove(&self, conversation_id: &str) -> bool {
        self.lock_shard(conversation_id)
            .remove(conversation_id)
            .is_some()
    }

    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut entries = lock_recovering(shard);
                let before = entries.len();
                entries.retain(|_, entry| now < entry.expires_at);
                before - entries.len()
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| lock_recovering(shard).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.sweep_expired(Utc::now());
                if evicted > 0 {
                    debug!(evicted, "conversation sweep evicted expired entries");
                }
            }
        })
    }

    fn lock_shard(&self, conversation_id: &str) -> ShardGuard<'_> {
        let index = (self.hasher.hash_one(conversation_id) as usize) % self.shards.len();
        lock_recovering(&self.shards[index])
    }
}

type ShardGuard<'a> = MutexGuard<'a, HashMap<String, StoredConversation>>;

fn lock_recovering(shard: &Shard) -> ShardGuard<'_> {
    match shard.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn load<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, Option<Vec<Turn>>> {
        Box::pin(async move { Ok(self.load_at(conversation_id, Utc::now())) })
    }

    fn replace<'a>(&'a self, conversation_id: &'a str, turns: Vec<Turn>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.replace_at(conversation_id, turns, Utc::now());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.remove(conversation_id)) })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
