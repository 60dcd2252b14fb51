use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::models::Turn;

mod memory;
mod redis_store;

pub use memory::InMemoryConversationStore;
pub use redis_store::RedisConversationStore;

pub const DEFAULT_HISTORY_WINDOW: usize = 10;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid stored conversation: {0}")]
    InvalidData(String),
}

/// Expiring key-value storage of conversation turn windows.
///
/// `replace` is a full overwrite that resets the entry's TTL; reads never
/// extend it. Expired entries read as absent even before they are evicted.
pub trait ConversationStore: Send + Sync {
    fn load<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, Option<Vec<Turn>>>;

    fn replace<'a>(&'a self, conversation_id: &'a str, turns: Vec<Turn>) -> StoreFuture<'a, ()>;

    fn delete<'a>(&'a self, conversation_id: &'a str) -> StoreFuture<'a, bool>;

    fn ping(&self) -> StoreFuture<'_, ()>;
}

pub fn history_tail(history: &[Turn], window: usize) -> Vec<Turn> {
    let start = history.len().saturating_sub(window);
    history[start..].to_vec()
}

pub fn committed_window(
    prior_history: &[Turn],
    window: usize,
    user_turn: Turn,
    assistant_turn: Turn,
) -> Vec<Turn> {
    let mut turns = history_tail(prior_history, window);
    turns.reserve(2);
    turns.push(user_turn);
    turns.push(assistant_turn);
    turns
}
